//!
//! Local-open probe
//! ----------------
//! Queries the host's `openfiles.exe` facility for files opened locally on
//! the server itself. The listing reports no client or session context, so
//! the client name defaults to the local host name and the access mode to
//! a fixed "Local" tag.

use chrono::Utc;
use futures_util::future::BoxFuture;
use tracing::warn;

use super::exec::run_capture;
use super::FileProbe;
use crate::model::OpenFileRecord;

pub struct LocalOpenProbe {
    host_name: String,
}

impl LocalOpenProbe {
    pub fn new() -> Self {
        let host_name = whoami::fallible::hostname()
            .map(|h| h.to_uppercase())
            .unwrap_or_else(|_| "LOCALHOST".to_string());
        Self { host_name }
    }

    #[cfg(test)]
    fn with_host_name(host_name: &str) -> Self {
        Self { host_name: host_name.to_string() }
    }
}

impl Default for LocalOpenProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl FileProbe for LocalOpenProbe {
    fn name(&self) -> &'static str {
        "local-open"
    }

    fn list_open_files(&self) -> BoxFuture<'_, Vec<OpenFileRecord>> {
        Box::pin(async move {
            match run_capture("openfiles.exe", &["/query", "/fo", "csv", "/nh"]).await {
                Ok(raw) => parse_openfiles_csv(&raw, &self.host_name),
                Err(e) => {
                    warn!(target: "opensight::probes", "local-open probe failed: {e:#}");
                    Vec::new()
                }
            }
        })
    }
}

/// Parse `openfiles /query /fo csv /nh` output. Columns: ID, Accessed By,
/// Type, Open File (Path\executable). Lines that are not four quoted
/// fields (status messages, continuation noise) are skipped.
pub fn parse_openfiles_csv(raw: &str, host_name: &str) -> Vec<OpenFileRecord> {
    let mut records = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || !line.starts_with('"') {
            continue;
        }
        let fields = split_csv_line(line);
        if fields.len() < 4 {
            continue;
        }
        let rec = OpenFileRecord {
            file_path: fields[3].clone(),
            user_name: fields[1].clone(),
            client_name: host_name.to_string(),
            access_mode: "Local".to_string(),
            opened_at: Utc::now(),
            session_id: 0,
            file_id: fields[0].parse::<i64>().unwrap_or(0),
        };
        if rec.is_valid() {
            records.push(rec);
        }
    }
    records
}

/// Minimal quote-aware CSV field splitter; openfiles quotes every field
/// and doubles embedded quotes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}
