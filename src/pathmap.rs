//!
//! Path equivalence mapping
//! ------------------------
//! Translates between network-share paths (`\\server\share\sub\file`) and
//! local paths (`D:\root\sub\file`) so a file can be located regardless of
//! which representation a caller or a data source used. All comparisons in
//! the crate go through [`normalize_path`], which is the canonical key for
//! path equality.
//!
//! The mapping table is built once at startup (static configuration merged
//! with discovered SMB shares, static entries winning on name collision)
//! and is read-only afterwards. Unmapped paths pass through unchanged: an
//! untranslatable path is still usable for exact-string matching against
//! records in the same representation.

use tracing::{debug, info};

/// Canonical comparison form: forward slashes become backslashes, trailing
/// separators are stripped, case is folded.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    path.replace('/', "\\").trim_end_matches('\\').to_lowercase()
}

/// True for network-share form (`\\server\share\...`).
pub fn is_network_path(path: &str) -> bool {
    path.starts_with("\\\\") || path.starts_with("//")
}

fn is_local_path(path: &str) -> bool {
    path.len() >= 2 && path.as_bytes()[1] == b':'
}

/// Association between a share name and a local filesystem root.
#[derive(Debug, Clone)]
pub struct ShareMapping {
    /// Stored case-folded; share lookups are case-insensitive.
    pub share_name: String,
    /// Stored in normalized form.
    pub local_path: String,
}

pub struct PathMapper {
    server_name: String,
    mappings: Vec<ShareMapping>,
}

impl PathMapper {
    /// Build a mapper from statically configured share mappings.
    pub fn new<I, S>(server_name: S, static_mappings: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
        S: Into<String>,
    {
        let mut mapper = Self { server_name: server_name.into(), mappings: Vec::new() };
        for (name, local) in static_mappings {
            if name.trim().is_empty() || local.trim().is_empty() {
                continue;
            }
            let share_name = name.to_lowercase();
            let local_path = normalize_path(&local);
            info!(target: "opensight::pathmap", "share mapping: {} -> {}", share_name, local_path);
            mapper.mappings.push(ShareMapping { share_name, local_path });
        }
        mapper
    }

    /// Merge discovered shares into the table. Statically configured names
    /// keep priority: a discovered share with an already-known name is
    /// ignored.
    pub fn add_discovered<I>(&mut self, discovered: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, local) in discovered {
            if name.trim().is_empty() || local.trim().is_empty() {
                continue;
            }
            let share_name = name.to_lowercase();
            if self.mappings.iter().any(|m| m.share_name == share_name) {
                continue;
            }
            let local_path = normalize_path(&local);
            info!(target: "opensight::pathmap", "discovered share: {} -> {}", share_name, local_path);
            self.mappings.push(ShareMapping { share_name, local_path });
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// Translate a network path into its local form. Local paths are
    /// normalized and returned unchanged; network paths with no known share
    /// mapping pass through as-is.
    pub fn to_local(&self, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }
        if is_local_path(path) {
            return normalize_path(path);
        }
        if !is_network_path(path) {
            return path.to_string();
        }
        // \\server\share\sub\file -> [server, share, sub\file]
        let body = normalize_path(path);
        let body = body.trim_start_matches('\\');
        let mut parts = body.splitn(3, '\\');
        let _server = parts.next().unwrap_or_default();
        let share = match parts.next() {
            Some(s) if !s.is_empty() => s,
            _ => return path.to_string(),
        };
        let remainder = parts.next().unwrap_or("");
        let mapping = match self.mappings.iter().find(|m| m.share_name == share) {
            Some(m) => m,
            None => {
                debug!(target: "opensight::pathmap", "no mapping for share '{}'", share);
                return path.to_string();
            }
        };
        if remainder.is_empty() {
            mapping.local_path.clone()
        } else {
            normalize_path(&format!("{}\\{}", mapping.local_path, remainder))
        }
    }

    /// Translate a local path into its network form by substituting the
    /// longest matching share root. Paths under no known share pass through
    /// unchanged.
    pub fn to_network(&self, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }
        if is_network_path(path) {
            return path.to_string();
        }
        let normalized = normalize_path(path);
        let best = self
            .mappings
            .iter()
            .filter(|m| {
                normalized.starts_with(&m.local_path)
                    && (normalized.len() == m.local_path.len()
                        || normalized.as_bytes()[m.local_path.len()] == b'\\')
            })
            .max_by_key(|m| m.local_path.len());
        let mapping = match best {
            Some(m) => m,
            None => return path.to_string(),
        };
        let relative = normalized[mapping.local_path.len()..].trim_start_matches('\\');
        if relative.is_empty() {
            format!("\\\\{}\\{}", self.server_name, mapping.share_name)
        } else {
            format!("\\\\{}\\{}\\{}", self.server_name, mapping.share_name, relative)
        }
    }

    /// All known normalized representations of a path: the normalized input
    /// plus its local and network translations, minus duplicates.
    pub fn all_variants(&self, path: &str) -> Vec<String> {
        let mut variants: Vec<String> = Vec::with_capacity(3);
        let mut push = |candidate: String| {
            if !candidate.is_empty() && !variants.contains(&candidate) {
                variants.push(candidate);
            }
        };
        push(normalize_path(path));
        push(normalize_path(&self.to_local(path)));
        push(normalize_path(&self.to_network(path)));
        variants
    }

    /// Whether two differently-formatted paths denote the same file.
    pub fn equivalent(&self, a: &str, b: &str) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if normalize_path(a) == normalize_path(b) {
            return true;
        }
        let va = self.all_variants(a);
        let vb = self.all_variants(b);
        va.iter().any(|v| vb.contains(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> PathMapper {
        PathMapper::new(
            "FILESRV",
            vec![
                ("Share".to_string(), "D:/Data".to_string()),
                ("deep".to_string(), "D:\\Data\\Projects".to_string()),
            ],
        )
    }

    #[test]
    fn normalization_folds_slashes_case_and_trailing_separators() {
        assert_eq!(normalize_path("D:/Data/A.txt"), "d:\\data\\a.txt");
        assert_eq!(normalize_path("D:\\Data\\"), "d:\\data");
        assert_eq!(normalize_path("\\\\Srv\\Share\\"), "\\\\srv\\share");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn unc_to_local_uses_share_mapping() {
        let m = mapper();
        assert_eq!(m.to_local("\\\\FILESRV\\share\\sub\\a.txt"), "d:\\data\\sub\\a.txt");
        assert_eq!(m.to_local("\\\\filesrv\\SHARE"), "d:\\data");
        // local input is just normalized
        assert_eq!(m.to_local("D:/Data/a.txt"), "d:\\data\\a.txt");
    }

    #[test]
    fn unmapped_paths_pass_through() {
        let m = mapper();
        assert_eq!(m.to_local("\\\\other\\unknown\\a.txt"), "\\\\other\\unknown\\a.txt");
        assert_eq!(m.to_network("E:\\Elsewhere\\a.txt"), "E:\\Elsewhere\\a.txt");
    }

    #[test]
    fn local_to_network_picks_longest_share_root() {
        let m = mapper();
        assert_eq!(m.to_network("D:\\Data\\plain.txt"), "\\\\FILESRV\\share\\plain.txt");
        // D:\Data\Projects is covered by both mappings; 'deep' is longer
        assert_eq!(m.to_network("D:\\Data\\Projects\\x.txt"), "\\\\FILESRV\\deep\\x.txt");
        assert_eq!(m.to_network("D:\\Data"), "\\\\FILESRV\\share");
    }

    #[test]
    fn prefix_match_respects_component_boundaries() {
        let m = mapper();
        // D:\DataOld is not under the D:\Data share root
        assert_eq!(m.to_network("D:\\DataOld\\a.txt"), "D:\\DataOld\\a.txt");
    }

    #[test]
    fn variants_contain_normalized_input() {
        let m = mapper();
        for p in ["D:\\Data\\a.txt", "\\\\filesrv\\share\\a.txt", "E:\\nowhere\\b.txt"] {
            assert!(m.all_variants(p).contains(&normalize_path(p)));
        }
    }

    #[test]
    fn variants_bridge_representations() {
        let m = mapper();
        let v = m.all_variants("\\\\FILESRV\\share\\a.txt");
        assert!(v.contains(&"\\\\filesrv\\share\\a.txt".to_string()));
        assert!(v.contains(&"d:\\data\\a.txt".to_string()));
    }

    #[test]
    fn equivalent_is_symmetric_and_cross_representation() {
        let m = mapper();
        let unc = "\\\\filesrv\\share\\sub\\a.txt";
        let local = "D:/Data/sub/A.TXT";
        assert!(m.equivalent(unc, local));
        assert!(m.equivalent(local, unc));
        assert!(m.equivalent(local, local));
        assert!(!m.equivalent(local, "D:\\Data\\sub\\b.txt"));
        assert!(!m.equivalent("", local));
    }

    #[test]
    fn static_mappings_win_over_discovered() {
        let mut m = PathMapper::new("SRV", vec![("share".to_string(), "D:\\Primary".to_string())]);
        m.add_discovered(vec![
            ("share".to_string(), "E:\\Other".to_string()),
            ("extra".to_string(), "E:\\Extra".to_string()),
        ]);
        assert_eq!(m.mapping_count(), 2);
        assert_eq!(m.to_local("\\\\srv\\share\\f"), "d:\\primary\\f");
        assert_eq!(m.to_local("\\\\srv\\extra\\f"), "e:\\extra\\f");
    }
}
