//!
//! Snapshot cache
//! --------------
//! Holds the most recent aggregation snapshot behind an absolute TTL and
//! answers the point and aggregate query shapes against it. The refresh
//! loop is the only writer; queries clone out an `Arc<Snapshot>` under a
//! short-lived lock and scan without contention. Once the TTL elapses the
//! cache behaves as if empty: "don't know" beats a wrong answer.
//!
//! Queries expand the requested path into all of its known representations
//! (UNC and local) before scanning, so records stored under either form
//! match, and the active-files view groups records under the canonical
//! local form for the same reason.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::model::{ActiveFileSummary, FileUsers, OpenFileRecord, Snapshot};
use crate::pathmap::{normalize_path, PathMapper};

struct CacheSlot {
    snapshot: Arc<Snapshot>,
    installed_at: DateTime<Utc>,
}

pub struct SnapshotCache {
    ttl: chrono::Duration,
    slot: Mutex<Option<CacheSlot>>,
}

impl SnapshotCache {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self { ttl, slot: Mutex::new(None) }
    }

    /// Atomically install a new snapshot, discarding the old one and
    /// resetting the expiration clock.
    pub fn replace(&self, snapshot: Snapshot) {
        let count = snapshot.records.len();
        let mut slot = self.slot.lock();
        *slot = Some(CacheSlot { snapshot: Arc::new(snapshot), installed_at: Utc::now() });
        debug!(target: "opensight::cache", "cache updated: {} records", count);
    }

    /// Explicit eviction.
    pub fn clear(&self) {
        *self.slot.lock() = None;
        info!(target: "opensight::cache", "cache cleared");
    }

    /// The current snapshot, or None when absent or past its TTL.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current_at(Utc::now())
    }

    fn current_at(&self, now: DateTime<Utc>) -> Option<Arc<Snapshot>> {
        let slot = self.slot.lock();
        let held = slot.as_ref()?;
        if now.signed_duration_since(held.installed_at) > self.ttl {
            return None;
        }
        Some(held.snapshot.clone())
    }

    /// Everyone holding `path` open, matching any known representation of
    /// the path. None when nothing matches or the snapshot is absent or
    /// expired.
    pub fn users_of(&self, mapper: &PathMapper, path: &str) -> Option<FileUsers> {
        let snapshot = self.current()?;
        let variants = mapper.all_variants(path);
        let users: Vec<OpenFileRecord> = snapshot
            .records
            .iter()
            .filter(|r| variants.iter().any(|v| *v == normalize_path(&r.file_path)))
            .cloned()
            .collect();
        if users.is_empty() {
            return None;
        }
        Some(FileUsers {
            file_path: path.to_string(),
            user_count: users.len(),
            users,
            last_updated: Utc::now(),
        })
    }

    /// "At a glance" view: one row per distinct file, grouped under the
    /// canonical local-form path so UNC and local records collapse
    /// together, sorted by user count descending.
    pub fn active_files(&self, mapper: &PathMapper) -> Vec<ActiveFileSummary> {
        let snapshot = match self.current() {
            Some(s) => s,
            None => return Vec::new(),
        };
        let mut groups: Vec<(String, ActiveFileSummary)> = Vec::new();
        for rec in &snapshot.records {
            let key = normalize_path(&mapper.to_local(&rec.file_path));
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, summary)) => {
                    summary.user_count += 1;
                    if rec.opened_at > summary.last_access {
                        summary.last_access = rec.opened_at;
                    }
                }
                None => groups.push((
                    key,
                    ActiveFileSummary {
                        file_path: rec.file_path.clone(),
                        user_count: 1,
                        last_access: rec.opened_at,
                    },
                )),
            }
        }
        let mut summaries: Vec<ActiveFileSummary> = groups.into_iter().map(|(_, s)| s).collect();
        summaries.sort_by(|a, b| b.user_count.cmp(&a.user_count));
        summaries
    }

    /// Files held open by one user, case-insensitive exact name match.
    pub fn files_of_user(&self, user_name: &str) -> Vec<OpenFileRecord> {
        let snapshot = match self.current() {
            Some(s) => s,
            None => return Vec::new(),
        };
        snapshot
            .records
            .iter()
            .filter(|r| r.user_name.eq_ignore_ascii_case(user_name))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(path: &str, user: &str) -> OpenFileRecord {
        OpenFileRecord {
            file_path: path.to_string(),
            user_name: user.to_string(),
            client_name: "PC".to_string(),
            access_mode: "Read/Write".to_string(),
            opened_at: Utc::now(),
            session_id: 0,
            file_id: 0,
        }
    }

    fn snapshot(records: Vec<OpenFileRecord>) -> Snapshot {
        Snapshot { records, captured_at: Utc::now() }
    }

    fn mapper() -> PathMapper {
        PathMapper::new("srv", vec![("share".to_string(), "D:\\Data".to_string())])
    }

    fn cache() -> SnapshotCache {
        SnapshotCache::new(chrono::Duration::minutes(5))
    }

    #[test]
    fn point_query_matches_case_and_separator_insensitively() {
        let c = cache();
        c.replace(snapshot(vec![rec("D:\\Data\\a.txt", "alice")]));
        let m = mapper();
        let hit = c.users_of(&m, "d:/data/A.TXT").unwrap();
        assert_eq!(hit.user_count, 1);
        assert_eq!(hit.users[0].user_name, "alice");
        assert!(c.users_of(&m, "d:/data/other.txt").is_none());
    }

    #[test]
    fn point_query_unions_across_path_representations() {
        let c = cache();
        c.replace(snapshot(vec![
            rec("D:\\Data\\a.txt", "alice"),
            rec("\\\\srv\\share\\a.txt", "bob"),
        ]));
        let m = mapper();
        // querying by either representation returns both holders
        for query in ["\\\\srv\\share\\a.txt", "D:\\Data\\a.txt"] {
            let hit = c.users_of(&m, query).unwrap();
            assert_eq!(hit.user_count, 2, "query {}", query);
            let mut names: Vec<&str> = hit.users.iter().map(|u| u.user_name.as_str()).collect();
            names.sort();
            assert_eq!(names, vec!["alice", "bob"]);
        }
    }

    #[test]
    fn active_files_collapses_equivalent_paths_and_sorts_by_count() {
        let c = cache();
        c.replace(snapshot(vec![
            rec("D:\\Data\\a.txt", "alice"),
            rec("\\\\srv\\share\\a.txt", "bob"),
            rec("D:\\Data\\lonely.txt", "carol"),
        ]));
        let m = mapper();
        let active = c.active_files(&m);
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].user_count, 2);
        assert_eq!(normalize_path(&m.to_local(&active[0].file_path)), "d:\\data\\a.txt");
        assert_eq!(active[1].user_count, 1);
    }

    #[test]
    fn files_of_user_is_case_insensitive() {
        let c = cache();
        c.replace(snapshot(vec![
            rec("D:\\Data\\a.txt", "Alice"),
            rec("D:\\Data\\b.txt", "alice"),
            rec("D:\\Data\\c.txt", "bob"),
        ]));
        assert_eq!(c.files_of_user("ALICE").len(), 2);
        assert_eq!(c.files_of_user("nobody").len(), 0);
    }

    #[test]
    fn expired_snapshot_behaves_as_empty() {
        let c = SnapshotCache::new(chrono::Duration::milliseconds(40));
        c.replace(snapshot(vec![rec("D:\\Data\\a.txt", "alice")]));
        let m = mapper();
        assert!(c.users_of(&m, "D:\\Data\\a.txt").is_some());
        std::thread::sleep(std::time::Duration::from_millis(80));
        assert!(c.users_of(&m, "D:\\Data\\a.txt").is_none());
        assert!(c.active_files(&m).is_empty());
        assert!(c.files_of_user("alice").is_empty());
    }

    #[test]
    fn replace_resets_the_expiration_clock_and_is_atomic() {
        let c = SnapshotCache::new(chrono::Duration::milliseconds(60));
        c.replace(snapshot(vec![rec("D:\\Data\\old.txt", "alice")]));
        std::thread::sleep(std::time::Duration::from_millis(40));
        c.replace(snapshot(vec![rec("D:\\Data\\new.txt", "bob")]));
        std::thread::sleep(std::time::Duration::from_millis(40));
        let m = mapper();
        // older snapshot fully replaced, newer clock still running
        assert!(c.users_of(&m, "D:\\Data\\old.txt").is_none());
        assert!(c.users_of(&m, "D:\\Data\\new.txt").is_some());
    }

    #[test]
    fn clear_evicts_immediately() {
        let c = cache();
        c.replace(snapshot(vec![rec("D:\\Data\\a.txt", "alice")]));
        c.clear();
        assert!(c.current().is_none());
    }
}
