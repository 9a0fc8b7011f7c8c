//! The plan store capability.

use kasmos_core::types::{PlanEntry, PlanStatus, TopicEntry};

use crate::error::StoreError;

/// Durable mapping from (project, plan filename) to plan record.
///
/// Two interchangeable backends implement this: the local JSON file
/// (`LocalStore`) and the HTTP client of the central SQLite server
/// (`HttpStore`). The plan FSM is written against this trait and must not be
/// able to tell the backends apart.
pub trait PlanStore: Send {
    /// Adds a new entry; fails with `AlreadyExists` on filename collision.
    fn create(&self, project: &str, entry: PlanEntry) -> Result<(), StoreError>;

    /// Fetches a single entry; fails with `NotFound` when absent.
    fn get(&self, project: &str, filename: &str) -> Result<PlanEntry, StoreError>;

    /// Replaces an existing entry; fails with `NotFound` when absent.
    fn update(&self, project: &str, filename: &str, entry: PlanEntry) -> Result<(), StoreError>;

    /// Atomically moves an entry's identity from `old` to `new`.
    fn rename(&self, project: &str, old: &str, new: &str) -> Result<(), StoreError>;

    /// All entries for a project, sorted by filename.
    fn list(&self, project: &str) -> Result<Vec<PlanEntry>, StoreError>;

    /// Entries whose status is one of `statuses`.
    fn list_by_status(
        &self,
        project: &str,
        statuses: &[PlanStatus],
    ) -> Result<Vec<PlanEntry>, StoreError>;

    /// Entries assigned to `topic`.
    fn list_by_topic(&self, project: &str, topic: &str) -> Result<Vec<PlanEntry>, StoreError>;

    /// The plan markdown body keyed by filename.
    fn get_content(&self, project: &str, filename: &str) -> Result<String, StoreError>;

    fn set_content(&self, project: &str, filename: &str, content: &str)
        -> Result<(), StoreError>;

    fn list_topics(&self, project: &str) -> Result<Vec<TopicEntry>, StoreError>;

    fn create_topic(&self, project: &str, entry: TopicEntry) -> Result<(), StoreError>;

    /// Reachability probe.
    fn ping(&self) -> Result<(), StoreError>;

    fn close(&self) -> Result<(), StoreError>;
}
