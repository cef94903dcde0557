//!
//! File discovery aggregator
//! -------------------------
//! Runs every probe in a fixed precedence order and merges their results
//! into one deduplicated snapshot. Order matters: only the first-seen
//! record for a `(normalized path, user)` key is retained, and the
//! session-aware network/local probes run before the noisier process-level
//! deep-handle probe so their records win.
//!
//! The aggregator never fails as a whole. Probes absorb their own errors
//! by contract, and a panicking probe is caught here and treated as
//! "probe returned nothing".

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;

use chrono::Utc;
use futures_util::FutureExt;
use tracing::{debug, error, info};

use crate::model::{OpenFileRecord, Snapshot};
use crate::pathmap::normalize_path;
use crate::probes::FileProbe;

pub struct Aggregator {
    probes: Vec<Box<dyn FileProbe>>,
}

impl Aggregator {
    /// Probes are polled in the order given; earlier probes win dedup ties.
    pub fn new(probes: Vec<Box<dyn FileProbe>>) -> Self {
        Self { probes }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Run one full discovery cycle and assemble a snapshot.
    pub async fn collect(&self) -> Snapshot {
        let mut records: Vec<OpenFileRecord> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for probe in &self.probes {
            let found = match AssertUnwindSafe(probe.list_open_files()).catch_unwind().await {
                Ok(found) => found,
                Err(_) => {
                    error!(target: "opensight::aggregate", "probe '{}' panicked, treating as empty", probe.name());
                    Vec::new()
                }
            };
            let reported = found.len();
            let mut added = 0usize;
            for rec in found {
                // Snapshot acceptance invariant: path and user are never empty.
                if !rec.is_valid() {
                    continue;
                }
                let key = (normalize_path(&rec.file_path), rec.user_name.to_lowercase());
                if seen.insert(key) {
                    records.push(rec);
                    added += 1;
                }
            }
            debug!(target: "opensight::aggregate", "probe '{}': {} reported, {} merged", probe.name(), reported, added);
        }
        info!(target: "opensight::aggregate", "discovery cycle found {} open files", records.len());
        Snapshot { records, captured_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;

    struct CannedProbe {
        name: &'static str,
        records: Vec<OpenFileRecord>,
    }

    impl FileProbe for CannedProbe {
        fn name(&self) -> &'static str {
            self.name
        }
        fn list_open_files(&self) -> BoxFuture<'_, Vec<OpenFileRecord>> {
            let records = self.records.clone();
            Box::pin(async move { records })
        }
    }

    struct PanickingProbe;

    impl FileProbe for PanickingProbe {
        fn name(&self) -> &'static str {
            "panicking"
        }
        fn list_open_files(&self) -> BoxFuture<'_, Vec<OpenFileRecord>> {
            Box::pin(async move { panic!("probe exploded") })
        }
    }

    fn rec(path: &str, user: &str, session_id: i64) -> OpenFileRecord {
        OpenFileRecord {
            file_path: path.to_string(),
            user_name: user.to_string(),
            client_name: "PC".to_string(),
            access_mode: "Read/Write".to_string(),
            opened_at: Utc::now(),
            session_id,
            file_id: 0,
        }
    }

    #[tokio::test]
    async fn dedup_retains_earlier_probe_record() {
        let agg = Aggregator::new(vec![
            Box::new(CannedProbe {
                name: "first",
                records: vec![rec("D:\\Data\\a.txt", "alice", 7)],
            }),
            Box::new(CannedProbe {
                name: "second",
                // same dedup key, different casing and separators
                records: vec![rec("d:/data/A.TXT", "ALICE", 99), rec("D:\\Data\\b.txt", "alice", 2)],
            }),
        ]);
        let snap = agg.collect().await;
        assert_eq!(snap.records.len(), 2);
        assert_eq!(snap.records[0].session_id, 7);
        assert_eq!(snap.records[1].file_path, "D:\\Data\\b.txt");
    }

    #[tokio::test]
    async fn same_path_different_users_both_kept() {
        let agg = Aggregator::new(vec![Box::new(CannedProbe {
            name: "only",
            records: vec![rec("D:\\Data\\a.txt", "alice", 1), rec("D:\\Data\\a.txt", "bob", 2)],
        })]);
        let snap = agg.collect().await;
        assert_eq!(snap.records.len(), 2);
    }

    #[tokio::test]
    async fn invalid_records_never_enter_a_snapshot() {
        let agg = Aggregator::new(vec![Box::new(CannedProbe {
            name: "only",
            records: vec![rec("", "alice", 1), rec("D:\\Data\\a.txt", " ", 2), rec("D:\\Data\\a.txt", "bob", 3)],
        })]);
        let snap = agg.collect().await;
        assert_eq!(snap.records.len(), 1);
        assert_eq!(snap.records[0].user_name, "bob");
    }

    #[tokio::test]
    async fn panicking_probe_does_not_abort_the_cycle() {
        let agg = Aggregator::new(vec![
            Box::new(PanickingProbe),
            Box::new(CannedProbe { name: "after", records: vec![rec("D:\\Data\\a.txt", "alice", 1)] }),
        ]);
        let snap = agg.collect().await;
        assert_eq!(snap.records.len(), 1);
    }
}
