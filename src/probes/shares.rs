//! SMB share discovery for the path mapper.
//!
//! Best-effort: enumeration failures are logged and yield an empty list so
//! startup never blocks on a broken share subsystem. Hidden administrative
//! shares (names ending in `$`) are skipped.

use serde_json::Value;
use tracing::warn;

use super::exec::run_powershell;

const LIST_SHARES: &str = "Get-SmbShare | Select-Object Name, Path | ConvertTo-Json -Compress";

/// Enumerate the host's SMB shares as (share name, local path) pairs.
pub async fn discover_share_mappings() -> Vec<(String, String)> {
    match run_powershell(LIST_SHARES).await {
        Ok(out) if !out.is_empty() => parse_share_json(&out),
        Ok(_) => Vec::new(),
        Err(e) => {
            warn!(target: "opensight::probes", "SMB share discovery failed: {e:#}");
            Vec::new()
        }
    }
}

/// Parse Get-SmbShare JSON output; one share serializes as a bare object,
/// several as an array.
pub fn parse_share_json(raw: &str) -> Vec<(String, String)> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "opensight::probes", "unparsable share listing: {e}");
            return Vec::new();
        }
    };
    let items: Vec<&Value> = match &value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![&value],
        _ => Vec::new(),
    };
    let mut shares = Vec::new();
    for item in items {
        let name = item.get("Name").and_then(Value::as_str).unwrap_or_default();
        let path = item.get("Path").and_then(Value::as_str).unwrap_or_default();
        if name.is_empty() || path.is_empty() || name.ends_with('$') {
            continue;
        }
        shares.push((name.to_string(), path.to_string()));
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_and_skips_hidden_shares() {
        let raw = r#"[
            {"Name": "Share", "Path": "D:\\Data"},
            {"Name": "ADMIN$", "Path": "C:\\Windows"},
            {"Name": "C$", "Path": "C:\\"},
            {"Name": "Public", "Path": "E:\\Public"}
        ]"#;
        let shares = parse_share_json(raw);
        assert_eq!(
            shares,
            vec![
                ("Share".to_string(), "D:\\Data".to_string()),
                ("Public".to_string(), "E:\\Public".to_string())
            ]
        );
    }

    #[test]
    fn parses_single_object() {
        let raw = r#"{"Name": "Only", "Path": "D:\\Only"}"#;
        assert_eq!(parse_share_json(raw), vec![("Only".to_string(), "D:\\Only".to_string())]);
    }

    #[test]
    fn malformed_output_yields_nothing() {
        assert!(parse_share_json("no shares here").is_empty());
        assert!(parse_share_json("42").is_empty());
    }
}
