//!
//! Deep-handle probe
//! -----------------
//! Enumerates every process's open file handles via the Sysinternals
//! `handle` utility. Only enabled when the tool is installed at one of the
//! well-known locations; enumeration is process-wide and slow, so the
//! child runs under a hard 30 second deadline and is killed on timeout
//! rather than allowed to block the cycle.
//!
//! Output parsing is a two-state scanner: a process-header line seeds the
//! current process/user context, and subsequent indented lines are tested
//! against a strict path-shape predicate before they produce records.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use super::exec::run_capture_timeout;
use super::FileProbe;
use crate::model::OpenFileRecord;

const HANDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Install locations checked in order; the first hit wins.
const HANDLE_CANDIDATES: &[&str] = &[
    "C:\\Program Files\\Sysinternals\\handle64.exe",
    "C:\\Program Files\\Sysinternals\\handle.exe",
    "C:\\Program Files\\SysinternalsSuite\\handle64.exe",
    "C:\\Program Files\\SysinternalsSuite\\handle.exe",
    "C:\\Tools\\handle64.exe",
    "C:\\Tools\\handle.exe",
    "C:\\Windows\\System32\\handle64.exe",
];

/// Drive-letter or UNC prefix; everything else a handle line mentions
/// (named pipes, registry keys, anonymous sections) is not a file path.
static PATH_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Za-z]:\\|\\\\[^\s\\]).*").expect("path shape regex"));

pub struct DeepHandleProbe {
    binary: PathBuf,
    host_name: String,
}

impl DeepHandleProbe {
    /// Probe is only available when the backing tool is present on disk.
    pub fn locate() -> Option<Self> {
        let mut candidates: Vec<PathBuf> = HANDLE_CANDIDATES.iter().map(PathBuf::from).collect();
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                candidates.push(dir.join("handle64.exe"));
                candidates.push(dir.join("handle.exe"));
            }
        }
        let binary = candidates.into_iter().find(|p| p.exists())?;
        info!(target: "opensight::probes", "deep-handle probe enabled: {}", binary.display());
        Some(Self::with_binary(binary))
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        let host_name = whoami::fallible::hostname()
            .map(|h| h.to_uppercase())
            .unwrap_or_else(|_| "LOCALHOST".to_string());
        Self { binary, host_name }
    }
}

impl FileProbe for DeepHandleProbe {
    fn name(&self) -> &'static str {
        "deep-handle"
    }

    fn list_open_files(&self) -> BoxFuture<'_, Vec<OpenFileRecord>> {
        Box::pin(async move {
            let program = self.binary.to_string_lossy().to_string();
            match run_capture_timeout(&program, &["-accepteula", "-a", "-nobanner"], HANDLE_TIMEOUT).await {
                Ok(raw) => parse_handle_output(&raw, &self.host_name, Utc::now()),
                Err(e) => {
                    warn!(target: "opensight::probes", "deep-handle probe failed: {e:#}");
                    Vec::new()
                }
            }
        })
    }
}

struct ProcessContext {
    process: String,
    pid: i64,
    user: String,
}

/// Two-state scan over `handle -a` output: awaiting a process header, or
/// inside a process's handle lines.
///
/// ```text
/// notepad.exe pid: 4720 CORP\alice
///    10: File  (RW-)   D:\Data\notes.txt
/// ```
pub fn parse_handle_output(raw: &str, host_name: &str, observed_at: DateTime<Utc>) -> Vec<OpenFileRecord> {
    let mut records = Vec::new();
    let mut context: Option<ProcessContext> = None;
    for line in raw.lines() {
        if line.is_empty() {
            continue;
        }
        let indented = line.starts_with(' ') || line.starts_with('\t');
        if !indented {
            // Separator rows and unparsable rows drop the context so stray
            // indented lines cannot attach to the wrong process.
            context = parse_process_header(line);
            continue;
        }
        let Some(ctx) = &context else { continue };
        if ctx.user.is_empty() {
            continue;
        }
        if let Some((handle_value, path)) = parse_file_line(line) {
            records.push(OpenFileRecord {
                file_path: path,
                user_name: ctx.user.clone(),
                client_name: host_name.to_string(),
                access_mode: format!("Handle:{}", ctx.process),
                opened_at: observed_at,
                session_id: ctx.pid,
                file_id: handle_value,
            });
        }
    }
    records
}

/// `name pid: 1234 DOMAIN\user` → context; anything else → None.
fn parse_process_header(line: &str) -> Option<ProcessContext> {
    let (process, rest) = line.split_once(" pid: ")?;
    let process = process.trim();
    let mut tokens = rest.split_whitespace();
    let pid = tokens.next()?.parse::<i64>().ok()?;
    let user = tokens.collect::<Vec<_>>().join(" ");
    // handle reports "\<unable to open process>" when access is denied
    let user = if user.starts_with('\\') || user.contains("unable to open") {
        String::new()
    } else {
        user
    };
    if process.is_empty() {
        return None;
    }
    Some(ProcessContext { process: process.to_string(), pid, user })
}

/// `  1A8: File  (RW-)   D:\Data\x.txt` → (0x1A8, path), applying the
/// path-shape predicate. Non-File handle types and non-path targets are
/// rejected.
fn parse_file_line(line: &str) -> Option<(i64, String)> {
    let trimmed = line.trim_start();
    let (handle_hex, rest) = trimmed.split_once(':')?;
    let handle_value = i64::from_str_radix(handle_hex.trim(), 16).ok()?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix("File")?.trim_start();
    // optional access-flags group, e.g. (RW-)
    let rest = if rest.starts_with('(') {
        match rest.split_once(')') {
            Some((_, tail)) => tail.trim_start(),
            None => return None,
        }
    } else {
        rest
    };
    let path = rest.trim();
    if path.is_empty() || !PATH_SHAPE.is_match(path) {
        return None;
    }
    Some((handle_value, path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
------------------------------------------------------------------------------
System pid: 4 \\<unable to open process>
   84: File  (R--)   C:\\pagefile.sys
------------------------------------------------------------------------------
notepad.exe pid: 4720 CORP\\alice
   10: File  (RW-)   D:\\Data\\notes.txt
   5C: Section       \\BaseNamedObjects\\windows_shell_counters
   1A8: File  (RW-)   \\\\FILESRV\\share\\report.xlsx
------------------------------------------------------------------------------
excel.exe pid: 9004 CORP\\bob
   20: File  (RW-)   D:\\Data\\budget.xlsx
   24: File  (RW-)   C:\\Windows\\Fonts\\arial.ttf
";

    #[test]
    fn scans_processes_and_filters_to_file_paths() {
        let recs = parse_handle_output(SAMPLE, "FILESRV", Utc::now());
        // System's user is unknown, so its handle produces no record.
        assert_eq!(recs.len(), 4);
        assert_eq!(recs[0].file_path, "D:\\Data\\notes.txt");
        assert_eq!(recs[0].user_name, "CORP\\alice");
        assert_eq!(recs[0].access_mode, "Handle:notepad.exe");
        assert_eq!(recs[0].session_id, 4720);
        assert_eq!(recs[0].file_id, 0x10);
        assert_eq!(recs[1].file_path, "\\\\FILESRV\\share\\report.xlsx");
        assert_eq!(recs[2].user_name, "CORP\\bob");
        assert_eq!(recs[2].session_id, 9004);
    }

    #[test]
    fn indented_lines_without_context_are_ignored() {
        let raw = "   10: File  (RW-)   D:\\Data\\orphan.txt\n";
        assert!(parse_handle_output(raw, "FILESRV", Utc::now()).is_empty());
    }

    #[test]
    fn non_path_targets_are_rejected() {
        assert!(parse_file_line("   5C: Section       \\BaseNamedObjects\\x").is_none());
        assert!(parse_file_line("   60: File  (---)   \\Device\\Afd").is_none());
        assert!(parse_file_line("   64: File  (RW-)   relative\\path.txt").is_none());
        assert!(parse_file_line("   68: File  (RW-)   C:\\ok.txt").is_some());
        assert!(parse_file_line("   6C: File  (RW-)   \\\\srv\\share\\ok.txt").is_some());
    }

    #[test]
    fn header_variants() {
        assert!(parse_process_header("notepad.exe pid: 4720 CORP\\alice").is_some());
        let denied = parse_process_header("System pid: 4 \\<unable to open process>").unwrap();
        assert!(denied.user.is_empty());
        assert!(parse_process_header("--------------").is_none());
        assert!(parse_process_header("nthandle v5.0 - Handle viewer").is_none());
    }
}
