//! Local JSON plan store.
//!
//! One file per project: `<plans_dir>/plan-state.json` maps plan filenames to
//! entries; plan bodies live as sibling `.md` files; topics in `topics.json`.
//! Every read-modify-write holds an advisory lock on a sibling lock file so
//! the TUI and spawned helper processes serialise their writes.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use kasmos_core::types::{PlanEntry, PlanStatus, TopicEntry};
use tracing::debug;

use crate::error::StoreError;
use crate::store::PlanStore;

const STATE_FILE: &str = "plan-state.json";
const TOPICS_FILE: &str = "topics.json";
const LOCK_FILE: &str = "plan-state.lock";

/// Plan store backed by JSON files in a single project's plans directory.
/// The `project` parameter of the capability is ignored: the directory *is*
/// the project.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Takes the advisory lock. The lock is released when the returned file
    /// handle drops.
    fn lock(&self) -> Result<File, StoreError> {
        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))?;
        file.lock_exclusive()?;
        Ok(file)
    }

    fn load_plans(&self) -> Result<BTreeMap<String, PlanEntry>, StoreError> {
        read_json_map(&self.dir.join(STATE_FILE))
    }

    fn save_plans(&self, plans: &BTreeMap<String, PlanEntry>) -> Result<(), StoreError> {
        write_json_atomic(&self.dir.join(STATE_FILE), plans)
    }

    fn load_topics(&self) -> Result<BTreeMap<String, TopicEntry>, StoreError> {
        read_json_map(&self.dir.join(TOPICS_FILE))
    }

    fn save_topics(&self, topics: &BTreeMap<String, TopicEntry>) -> Result<(), StoreError> {
        write_json_atomic(&self.dir.join(TOPICS_FILE), topics)
    }

    fn content_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Runs a read-modify-write over the full plan map while holding the
    /// advisory lock, so multi-step mutations (like an FSM transition)
    /// serialise against other processes. The map is persisted only when `f`
    /// succeeds; on error nothing is written.
    pub fn with_plans_locked<T, E>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, PlanEntry>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let _lock = self.lock()?;
        let mut plans = self.load_plans()?;
        let result = f(&mut plans)?;
        self.save_plans(&plans)?;
        Ok(result)
    }
}

fn read_json_map<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<BTreeMap<String, T>, StoreError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };
    Ok(serde_json::from_slice(&data)?)
}

/// Writes via a temp file + rename so a crash mid-write never leaves a
/// truncated state file behind.
fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl PlanStore for LocalStore {
    fn create(&self, _project: &str, entry: PlanEntry) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let mut plans = self.load_plans()?;
        if plans.contains_key(&entry.filename) {
            return Err(StoreError::plan_exists(&entry.filename));
        }

        let mut stored = entry;
        if let Some(content) = stored.content.take() {
            fs::write(self.content_path(&stored.filename), content)?;
        }
        debug!(filename = %stored.filename, "registering plan");
        plans.insert(stored.filename.clone(), stored);
        self.save_plans(&plans)
    }

    fn get(&self, _project: &str, filename: &str) -> Result<PlanEntry, StoreError> {
        let plans = self.load_plans()?;
        plans
            .get(filename)
            .cloned()
            .ok_or_else(|| StoreError::plan_not_found(filename))
    }

    fn update(&self, _project: &str, filename: &str, entry: PlanEntry) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let mut plans = self.load_plans()?;
        if !plans.contains_key(filename) {
            return Err(StoreError::plan_not_found(filename));
        }

        let mut stored = entry;
        stored.filename = filename.to_string();
        if let Some(content) = stored.content.take() {
            fs::write(self.content_path(filename), content)?;
        }
        plans.insert(filename.to_string(), stored);
        self.save_plans(&plans)
    }

    fn rename(&self, _project: &str, old: &str, new: &str) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let mut plans = self.load_plans()?;
        if plans.contains_key(new) {
            return Err(StoreError::plan_exists(new));
        }
        let Some(mut entry) = plans.remove(old) else {
            return Err(StoreError::plan_not_found(old));
        };
        entry.filename = new.to_string();
        plans.insert(new.to_string(), entry);

        let old_content = self.content_path(old);
        if old_content.exists() {
            fs::rename(old_content, self.content_path(new))?;
        }
        self.save_plans(&plans)
    }

    fn list(&self, _project: &str) -> Result<Vec<PlanEntry>, StoreError> {
        // BTreeMap iteration is already filename-ordered.
        Ok(self.load_plans()?.into_values().collect())
    }

    fn list_by_status(
        &self,
        project: &str,
        statuses: &[PlanStatus],
    ) -> Result<Vec<PlanEntry>, StoreError> {
        let mut plans = self.list(project)?;
        plans.retain(|entry| statuses.contains(&entry.status));
        Ok(plans)
    }

    fn list_by_topic(&self, project: &str, topic: &str) -> Result<Vec<PlanEntry>, StoreError> {
        let mut plans = self.list(project)?;
        plans.retain(|entry| entry.topic.as_deref() == Some(topic));
        Ok(plans)
    }

    fn get_content(&self, _project: &str, filename: &str) -> Result<String, StoreError> {
        match fs::read_to_string(self.content_path(filename)) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::plan_not_found(filename))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn set_content(
        &self,
        _project: &str,
        filename: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let plans = self.load_plans()?;
        if !plans.contains_key(filename) {
            return Err(StoreError::plan_not_found(filename));
        }
        fs::write(self.content_path(filename), content)?;
        Ok(())
    }

    fn list_topics(&self, _project: &str) -> Result<Vec<TopicEntry>, StoreError> {
        Ok(self.load_topics()?.into_values().collect())
    }

    fn create_topic(&self, _project: &str, entry: TopicEntry) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let mut topics = self.load_topics()?;
        if topics.contains_key(&entry.name) {
            return Err(StoreError::topic_exists(&entry.name));
        }
        topics.insert(entry.name.clone(), entry);
        self.save_topics(&topics)
    }

    fn ping(&self) -> Result<(), StoreError> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(StoreError::Unreachable {
                cause: format!("plans directory missing: {}", self.dir.display()),
            })
        }
    }

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("kasmos-local-store-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn mk_entry(filename: &str) -> PlanEntry {
        PlanEntry::new(filename, format!("plan {filename}"), "plan/test", Utc::now())
    }

    #[test]
    fn create_then_get_round_trips_entry() {
        let dir = unique_temp_dir("roundtrip");
        let store = LocalStore::new(&dir);

        let entry = mk_entry("2026-02-21-auth.md");
        store.create("proj", entry.clone()).expect("create");
        let loaded = store.get("proj", "2026-02-21-auth.md").expect("get");
        assert_eq!(loaded, entry);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn create_rejects_duplicate_filename() {
        let dir = unique_temp_dir("duplicate");
        let store = LocalStore::new(&dir);

        store
            .create("proj", mk_entry("2026-02-21-auth.md"))
            .expect("first create");
        let err = store
            .create("proj", mk_entry("2026-02-21-auth.md"))
            .expect_err("duplicate must fail");
        assert!(err.is_conflict());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn get_missing_plan_is_not_found() {
        let dir = unique_temp_dir("missing-get");
        let store = LocalStore::new(&dir);

        let err = store.get("proj", "2026-01-01-ghost.md").expect_err("miss");
        assert!(err.is_not_found());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_state_file_lists_as_empty() {
        let dir = unique_temp_dir("empty-list");
        let store = LocalStore::new(&dir);
        assert!(store.list("proj").expect("list").is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn update_replaces_entry_and_requires_existence() {
        let dir = unique_temp_dir("update");
        let store = LocalStore::new(&dir);

        let mut entry = mk_entry("2026-02-21-auth.md");
        store.create("proj", entry.clone()).expect("create");

        entry.status = PlanStatus::Planning;
        entry.description = "revised".to_string();
        store
            .update("proj", "2026-02-21-auth.md", entry.clone())
            .expect("update");
        let loaded = store.get("proj", "2026-02-21-auth.md").expect("get");
        assert_eq!(loaded.status, PlanStatus::Planning);
        assert_eq!(loaded.description, "revised");

        let err = store
            .update("proj", "2026-01-01-ghost.md", mk_entry("2026-01-01-ghost.md"))
            .expect_err("update of missing plan must fail");
        assert!(err.is_not_found());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rename_moves_identity_and_content() {
        let dir = unique_temp_dir("rename");
        let store = LocalStore::new(&dir);

        let mut entry = mk_entry("2026-02-21-auth.md");
        entry.content = Some("# Plan body\n".to_string());
        store.create("proj", entry).expect("create");

        store
            .rename("proj", "2026-02-21-auth.md", "2026-02-21-auth-v2.md")
            .expect("rename");

        let loaded = store.get("proj", "2026-02-21-auth-v2.md").expect("get new");
        assert_eq!(loaded.filename, "2026-02-21-auth-v2.md");
        assert!(store.get("proj", "2026-02-21-auth.md").is_err());
        assert_eq!(
            store
                .get_content("proj", "2026-02-21-auth-v2.md")
                .expect("content follows rename"),
            "# Plan body\n"
        );

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rename_onto_existing_plan_conflicts() {
        let dir = unique_temp_dir("rename-conflict");
        let store = LocalStore::new(&dir);

        store
            .create("proj", mk_entry("2026-02-21-a.md"))
            .expect("create a");
        store
            .create("proj", mk_entry("2026-02-21-b.md"))
            .expect("create b");

        let err = store
            .rename("proj", "2026-02-21-a.md", "2026-02-21-b.md")
            .expect_err("rename onto existing must fail");
        assert!(err.is_conflict());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn list_is_sorted_by_filename() {
        let dir = unique_temp_dir("sorted");
        let store = LocalStore::new(&dir);

        store
            .create("proj", mk_entry("2026-02-22-later.md"))
            .expect("create");
        store
            .create("proj", mk_entry("2026-02-21-earlier.md"))
            .expect("create");

        let listed = store.list("proj").expect("list");
        let names: Vec<&str> = listed.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["2026-02-21-earlier.md", "2026-02-22-later.md"]);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn list_by_status_and_topic_filter() {
        let dir = unique_temp_dir("filters");
        let store = LocalStore::new(&dir);

        let mut planning = mk_entry("2026-02-21-a.md");
        planning.status = PlanStatus::Planning;
        planning.topic = Some("infra".to_string());
        store.create("proj", planning).expect("create a");
        store
            .create("proj", mk_entry("2026-02-21-b.md"))
            .expect("create b");

        let planning_only = store
            .list_by_status("proj", &[PlanStatus::Planning])
            .expect("by status");
        assert_eq!(planning_only.len(), 1);
        assert_eq!(planning_only[0].filename, "2026-02-21-a.md");

        let infra = store.list_by_topic("proj", "infra").expect("by topic");
        assert_eq!(infra.len(), 1);
        assert_eq!(infra[0].filename, "2026-02-21-a.md");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn content_is_stored_as_sibling_markdown_file() {
        let dir = unique_temp_dir("content");
        let store = LocalStore::new(&dir);

        store
            .create("proj", mk_entry("2026-02-21-auth.md"))
            .expect("create");
        store
            .set_content("proj", "2026-02-21-auth.md", "# Auth plan\n")
            .expect("set content");

        assert!(dir.join("2026-02-21-auth.md").is_file());
        assert_eq!(
            store.get_content("proj", "2026-02-21-auth.md").expect("get"),
            "# Auth plan\n"
        );

        let err = store
            .set_content("proj", "2026-01-01-ghost.md", "x")
            .expect_err("content of unregistered plan must fail");
        assert!(err.is_not_found());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn legacy_status_strings_canonicalise_on_load() {
        let dir = unique_temp_dir("legacy");
        let raw = format!(
            "{{\"old-plan.md\": {{\"filename\": \"old-plan.md\", \"status\": \"in_progress\", \"created_at\": \"{}\"}}}}",
            Utc::now().to_rfc3339()
        );
        fs::write(dir.join("plan-state.json"), raw).expect("seed legacy state");

        let store = LocalStore::new(&dir);
        let loaded = store.get("proj", "old-plan.md").expect("get legacy entry");
        assert_eq!(loaded.status, PlanStatus::Implementing);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn topics_create_and_list() {
        let dir = unique_temp_dir("topics");
        let store = LocalStore::new(&dir);

        let topic = TopicEntry {
            name: "infra".to_string(),
            description: "infrastructure work".to_string(),
            created_at: Utc::now(),
        };
        store.create_topic("proj", topic.clone()).expect("create");
        let err = store
            .create_topic("proj", topic)
            .expect_err("duplicate topic must fail");
        assert!(err.is_conflict());

        let topics = store.list_topics("proj").expect("list topics");
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].name, "infra");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn ping_reflects_directory_presence() {
        let dir = unique_temp_dir("ping");
        let store = LocalStore::new(&dir);
        store.ping().expect("existing dir pings ok");

        let gone = LocalStore::new(dir.join("not-created"));
        assert!(gone.ping().is_err());

        let _ = fs::remove_dir_all(dir);
    }
}
