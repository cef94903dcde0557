//!
//! Open-file source probes
//! -----------------------
//! Each probe queries one external subsystem for "file opened by user"
//! records. Probes are independent and failure-isolated: a launch error,
//! malformed output or timeout is absorbed inside the probe and surfaces
//! as an empty list plus a logged warning, never as an error to the
//! aggregation cycle. The external utilities are treated as untrusted,
//! possibly slow, possibly malformed text/JSON producers.

pub mod exec;
pub mod handle;
pub mod local;
pub mod resolve;
pub mod shares;
pub mod smb;

use futures_util::future::BoxFuture;

use crate::model::OpenFileRecord;

/// One external source of open-file information.
///
/// Implementations may shell out to OS utilities or be test doubles
/// returning canned data; the aggregator is agnostic to how a probe
/// obtains its list.
pub trait FileProbe: Send + Sync {
    fn name(&self) -> &'static str;
    fn list_open_files(&self) -> BoxFuture<'_, Vec<OpenFileRecord>>;
}
