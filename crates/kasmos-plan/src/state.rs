//! In-memory snapshot of the plan store, plus plan registration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kasmos_core::types::{is_valid_plan_filename, PlanEntry, PlanStatus};
use kasmos_store::{PlanStore, StoreError};

/// A plan entry with its filename, for display listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanInfo {
    pub filename: String,
    pub status: PlanStatus,
}

/// Read-only snapshot of every plan in a project, reloaded each metadata
/// tick. Mutations go through the store and the FSM, never through this.
#[derive(Debug, Clone, Default)]
pub struct PlanState {
    plans: BTreeMap<String, PlanEntry>,
}

impl PlanState {
    pub fn load(store: &dyn PlanStore, project: &str) -> Result<Self, StoreError> {
        let mut plans = BTreeMap::new();
        for entry in store.list(project)? {
            plans.insert(entry.filename.clone(), entry);
        }
        Ok(Self { plans })
    }

    pub fn from_entries(entries: Vec<PlanEntry>) -> Self {
        let mut plans = BTreeMap::new();
        for entry in entries {
            plans.insert(entry.filename.clone(), entry);
        }
        Self { plans }
    }

    pub fn entry(&self, filename: &str) -> Option<&PlanEntry> {
        self.plans.get(filename)
    }

    pub fn status(&self, filename: &str) -> Option<PlanStatus> {
        self.plans.get(filename).map(|entry| entry.status)
    }

    pub fn is_done(&self, filename: &str) -> bool {
        self.status(filename) == Some(PlanStatus::Done)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PlanEntry> {
        self.plans.values()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Refreshes the snapshot's view of one plan's status after the FSM has
    /// written it, so checks later in the same update step do not act on a
    /// stale status.
    pub fn set_status(&mut self, filename: &str, status: PlanStatus) {
        if let Some(entry) = self.plans.get_mut(filename) {
            entry.status = status;
        }
    }

    /// Plans that are neither done nor cancelled, sorted by filename.
    pub fn unfinished(&self) -> Vec<PlanInfo> {
        self.plans
            .values()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| PlanInfo {
                filename: entry.filename.clone(),
                status: entry.status,
            })
            .collect()
    }
}

/// Registers a new plan in `ready` status after validating the canonical
/// `YYYY-MM-DD-kebab-title.md` filename form.
pub fn register_plan(
    store: &dyn PlanStore,
    project: &str,
    filename: &str,
    description: &str,
    branch: &str,
    created_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    if !is_valid_plan_filename(filename) {
        return Err(StoreError::InvalidFilename {
            filename: filename.to_string(),
        });
    }
    store.create(
        project,
        PlanEntry::new(filename, description, branch, created_at),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kasmos_store::LocalStore;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("kasmos-plan-state-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn mk_entry(filename: &str, status: PlanStatus) -> PlanEntry {
        let mut entry = PlanEntry::new(filename, "test", "plan/test", Utc::now());
        entry.status = status;
        entry
    }

    #[test]
    fn unfinished_excludes_terminal_statuses_and_sorts() {
        let state = PlanState::from_entries(vec![
            mk_entry("2026-02-23-c.md", PlanStatus::Done),
            mk_entry("2026-02-22-b.md", PlanStatus::Implementing),
            mk_entry("2026-02-21-a.md", PlanStatus::Ready),
            mk_entry("2026-02-24-d.md", PlanStatus::Cancelled),
        ]);

        let unfinished = state.unfinished();
        let names: Vec<&str> = unfinished.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["2026-02-21-a.md", "2026-02-22-b.md"]);
    }

    #[test]
    fn is_done_is_true_only_for_done() {
        let state = PlanState::from_entries(vec![
            mk_entry("2026-02-21-a.md", PlanStatus::Done),
            mk_entry("2026-02-22-b.md", PlanStatus::Reviewing),
        ]);
        assert!(state.is_done("2026-02-21-a.md"));
        assert!(!state.is_done("2026-02-22-b.md"));
        assert!(!state.is_done("missing.md"));
    }

    #[test]
    fn load_round_trips_through_local_store() {
        let dir = unique_temp_dir("load");
        let store = LocalStore::new(&dir);
        register_plan(
            &store,
            "proj",
            "2026-02-21-auth.md",
            "auth rework",
            "plan/auth",
            Utc::now(),
        )
        .expect("register");

        let state = PlanState::load(&store, "proj").expect("load");
        assert_eq!(state.len(), 1);
        assert_eq!(
            state.status("2026-02-21-auth.md"),
            Some(PlanStatus::Ready)
        );
        assert_eq!(
            state.entry("2026-02-21-auth.md").expect("entry").branch,
            "plan/auth"
        );

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn register_rejects_malformed_filenames() {
        let dir = unique_temp_dir("register-invalid");
        let store = LocalStore::new(&dir);

        let err = register_plan(&store, "proj", "Auth Plan.md", "x", "plan/x", Utc::now())
            .expect_err("invalid filename must fail");
        assert!(matches!(err, StoreError::InvalidFilename { .. }));
        assert!(store.list("proj").expect("list").is_empty());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn register_rejects_duplicates() {
        let dir = unique_temp_dir("register-dup");
        let store = LocalStore::new(&dir);

        register_plan(&store, "proj", "2026-02-21-a.md", "x", "plan/a", Utc::now())
            .expect("first register");
        let err = register_plan(&store, "proj", "2026-02-21-a.md", "x", "plan/a", Utc::now())
            .expect_err("duplicate register must fail");
        assert!(err.is_conflict());

        let _ = fs::remove_dir_all(dir);
    }
}
