//!
//! Network-share probe
//! -------------------
//! Primary source: `Get-SmbOpenFile` JSON output, which carries session
//! and file identifiers per open handle. Supplementary source: the `net
//! file` table, which sometimes lists handles the SMB cmdlet misses but
//! reports no session context. Both result sets are merged with the
//! primary source winning on a duplicate (path, user), so session-aware
//! identifiers are preserved.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use super::exec::{run_capture, run_powershell};
use super::resolve::HostnameResolver;
use super::FileProbe;
use crate::model::OpenFileRecord;
use crate::pathmap::normalize_path;

const SMB_OPEN_FILES: &str = "Get-SmbOpenFile | Select-Object FileId, SessionId, Path, ClientComputerName, ClientUserName, ShareRelativePath | ConvertTo-Json -Compress";

pub struct SmbShareProbe {
    resolver: Arc<HostnameResolver>,
}

impl SmbShareProbe {
    pub fn new(resolver: Arc<HostnameResolver>) -> Self {
        Self { resolver }
    }

    async fn query_smb_open_files(&self) -> Result<Vec<OpenFileRecord>> {
        let raw = run_powershell(SMB_OPEN_FILES).await?;
        if raw.is_empty() {
            debug!(target: "opensight::probes", "Get-SmbOpenFile returned no open files");
            return Ok(Vec::new());
        }
        let parsed = parse_smb_json(&raw);
        // Resolve client identifiers after parsing; the parser stays pure.
        let mut records = Vec::with_capacity(parsed.len());
        for mut rec in parsed {
            rec.client_name = self.resolver.resolve(&rec.client_name).await;
            records.push(rec);
        }
        Ok(records)
    }

    async fn query_net_file(&self) -> Result<Vec<OpenFileRecord>> {
        let raw = run_capture("net.exe", &["file"]).await?;
        Ok(parse_net_file(&raw))
    }
}

impl FileProbe for SmbShareProbe {
    fn name(&self) -> &'static str {
        "smb-share"
    }

    fn list_open_files(&self) -> BoxFuture<'_, Vec<OpenFileRecord>> {
        Box::pin(async move {
            let mut records = match self.query_smb_open_files().await {
                Ok(records) => records,
                Err(e) => {
                    warn!(target: "opensight::probes", "smb-share probe failed: {e:#}");
                    Vec::new()
                }
            };
            match self.query_net_file().await {
                Ok(extra) => merge_supplement(&mut records, extra),
                Err(e) => {
                    // Supplement only; the primary listing stands on its own.
                    warn!(target: "opensight::probes", "net file listing failed: {e:#}");
                }
            }
            records
        })
    }
}

/// Parse Get-SmbOpenFile JSON. One open file serializes as a bare object,
/// several as an array; anything else is treated as an empty listing.
/// Records without a path or user are dropped.
pub fn parse_smb_json(raw: &str) -> Vec<OpenFileRecord> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "opensight::probes", "unparsable Get-SmbOpenFile output: {e}");
            return Vec::new();
        }
    };
    let items: Vec<&Value> = match &value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![&value],
        _ => Vec::new(),
    };
    let mut records = Vec::new();
    for item in items {
        if let Some(rec) = parse_smb_item(item) {
            records.push(rec);
        }
    }
    records
}

fn parse_smb_item(item: &Value) -> Option<OpenFileRecord> {
    let path = item.get("Path").and_then(Value::as_str).unwrap_or_default();
    let user = item.get("ClientUserName").and_then(Value::as_str).unwrap_or_default();
    let rec = OpenFileRecord {
        file_path: path.to_string(),
        user_name: user.to_string(),
        client_name: item
            .get("ClientComputerName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        access_mode: "Read/Write".to_string(),
        // Get-SmbOpenFile does not report an open time; use observation time.
        opened_at: Utc::now(),
        session_id: item.get("SessionId").and_then(Value::as_i64).unwrap_or(0),
        file_id: item.get("FileId").and_then(Value::as_i64).unwrap_or(0),
    };
    rec.is_valid().then_some(rec)
}

/// Parse the `net file` table:
///
/// ```text
/// ID         Path                       User name        # Locks
/// -------------------------------------------------------------------
/// 12         D:\Data\report.xlsx        ALICE            0
/// ```
///
/// Paths may contain spaces; the user name and lock count are single
/// trailing tokens, so everything between the ID and those two columns is
/// the path.
pub fn parse_net_file(raw: &str) -> Vec<OpenFileRecord> {
    let mut records = Vec::new();
    let mut in_table = false;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !in_table {
            if line.chars().all(|c| c == '-') && line.len() > 3 {
                in_table = true;
            }
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 4 {
            continue;
        }
        let id = match tokens[0].parse::<i64>() {
            Ok(id) => id,
            // "The command completed successfully." and similar trailers
            Err(_) => continue,
        };
        if tokens[tokens.len() - 1].parse::<u64>().is_err() {
            continue;
        }
        let user = tokens[tokens.len() - 2];
        let path = tokens[1..tokens.len() - 2].join(" ");
        let rec = OpenFileRecord {
            file_path: path,
            user_name: user.to_string(),
            client_name: String::new(),
            access_mode: "Read/Write".to_string(),
            opened_at: Utc::now(),
            session_id: 0,
            file_id: id,
        };
        if rec.is_valid() {
            records.push(rec);
        }
    }
    records
}

/// Append supplementary records unless the primary listing already has the
/// same (normalized path, user): the primary record keeps its session and
/// file identifiers.
pub fn merge_supplement(primary: &mut Vec<OpenFileRecord>, supplement: Vec<OpenFileRecord>) {
    let seen: std::collections::HashSet<(String, String)> = primary
        .iter()
        .map(|r| (normalize_path(&r.file_path), r.user_name.to_lowercase()))
        .collect();
    for rec in supplement {
        let key = (normalize_path(&rec.file_path), rec.user_name.to_lowercase());
        if !seen.contains(&key) {
            primary.push(rec);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array() {
        let raw = r#"[
            {"FileId": 101, "SessionId": 7, "Path": "D:\\Data\\a.txt", "ClientComputerName": "10.0.0.5", "ClientUserName": "alice"},
            {"FileId": 102, "SessionId": 8, "Path": "D:\\Data\\b.txt", "ClientComputerName": "BOB-PC", "ClientUserName": "bob"}
        ]"#;
        let recs = parse_smb_json(raw);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].file_path, "D:\\Data\\a.txt");
        assert_eq!(recs[0].user_name, "alice");
        assert_eq!(recs[0].session_id, 7);
        assert_eq!(recs[0].file_id, 101);
        assert_eq!(recs[0].access_mode, "Read/Write");
    }

    #[test]
    fn parses_single_object() {
        let raw = r#"{"FileId": 5, "SessionId": 1, "Path": "D:\\x.txt", "ClientComputerName": "PC", "ClientUserName": "carol"}"#;
        let recs = parse_smb_json(raw);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].user_name, "carol");
    }

    #[test]
    fn drops_records_without_path_or_user() {
        let raw = r#"[
            {"FileId": 1, "SessionId": 1, "Path": "", "ClientUserName": "alice"},
            {"FileId": 2, "SessionId": 1, "ClientUserName": "bob"},
            {"FileId": 3, "SessionId": 1, "Path": "D:\\ok.txt", "ClientUserName": ""},
            {"FileId": 4, "SessionId": 1, "Path": "D:\\ok.txt", "ClientUserName": "dave"}
        ]"#;
        let recs = parse_smb_json(raw);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].user_name, "dave");
    }

    #[test]
    fn malformed_json_yields_nothing() {
        assert!(parse_smb_json("PowerShell is hosed").is_empty());
        assert!(parse_smb_json("[1, 2]").is_empty());
    }

    #[test]
    fn parses_net_file_table_with_spaced_paths() {
        let raw = "\
ID         Path                                    User name            # Locks

-------------------------------------------------------------------------------
12         D:\\Data\\report.xlsx                    ALICE                0
34         D:\\Data\\Q3 planning notes.docx         BOB                  1
The command completed successfully.
";
        let recs = parse_net_file(raw);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].file_id, 12);
        assert_eq!(recs[0].user_name, "ALICE");
        assert_eq!(recs[1].file_path, "D:\\Data\\Q3 planning notes.docx");
        assert_eq!(recs[1].user_name, "BOB");
    }

    #[test]
    fn net_file_with_no_entries_yields_nothing() {
        assert!(parse_net_file("There are no entries in the list.").is_empty());
        assert!(parse_net_file("").is_empty());
    }

    #[test]
    fn supplement_does_not_override_primary_identifiers() {
        let mut primary = vec![OpenFileRecord {
            file_path: "D:\\Data\\a.txt".into(),
            user_name: "Alice".into(),
            client_name: "ALICE-PC".into(),
            access_mode: "Read/Write".into(),
            opened_at: Utc::now(),
            session_id: 7,
            file_id: 101,
        }];
        let supplement = vec![
            OpenFileRecord {
                // duplicate of the primary record by (path, user), case-insensitive
                file_path: "d:/data/A.TXT".into(),
                user_name: "ALICE".into(),
                client_name: String::new(),
                access_mode: "Read/Write".into(),
                opened_at: Utc::now(),
                session_id: 0,
                file_id: 55,
            },
            OpenFileRecord {
                file_path: "D:\\Data\\only-net-file.txt".into(),
                user_name: "bob".into(),
                client_name: String::new(),
                access_mode: "Read/Write".into(),
                opened_at: Utc::now(),
                session_id: 0,
                file_id: 56,
            },
        ];
        merge_supplement(&mut primary, supplement);
        assert_eq!(primary.len(), 2);
        assert_eq!(primary[0].session_id, 7);
        assert_eq!(primary[0].file_id, 101);
        assert_eq!(primary[1].file_path, "D:\\Data\\only-net-file.txt");
    }
}
