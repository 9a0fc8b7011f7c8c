//! Plan lifecycle state machine — the sole writer of plan status.
//!
//! Every status mutation flows through [`PlanFsm::transition`]. With the
//! local backend the whole load-validate-write runs under the store's
//! advisory file lock; with the remote backend the server serialises writes
//! through SQLite.

use std::fmt;

use kasmos_core::types::PlanStatus;
use kasmos_store::{LocalStore, PlanStore, StoreError};
use tracing::info;

/// A lifecycle transition trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanEvent {
    PlanStart,
    PlannerFinished,
    ImplementStart,
    ImplementFinished,
    ReviewApproved,
    ReviewChangesRequested,
    RequestReview,
    StartOver,
    Reimplement,
    Cancel,
    Reopen,
}

impl PlanEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanStart => "plan_start",
            Self::PlannerFinished => "planner_finished",
            Self::ImplementStart => "implement_start",
            Self::ImplementFinished => "implement_finished",
            Self::ReviewApproved => "review_approved",
            Self::ReviewChangesRequested => "review_changes_requested",
            Self::RequestReview => "request_review",
            Self::StartOver => "start_over",
            Self::Reimplement => "reimplement",
            Self::Cancel => "cancel",
            Self::Reopen => "reopen",
        }
    }

    /// True for events that only the user may trigger from the UI — agent
    /// sentinel output must never fire these.
    pub fn is_user_only(&self) -> bool {
        matches!(
            self,
            Self::StartOver | Self::Reimplement | Self::RequestReview | Self::Cancel | Self::Reopen
        )
    }
}

impl fmt::Display for PlanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FsmError {
    #[error("invalid transition: {from} + {event}")]
    InvalidTransition { from: PlanStatus, event: PlanEvent },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The complete transition table. Anything not listed is invalid.
pub fn apply_transition(current: PlanStatus, event: PlanEvent) -> Result<PlanStatus, FsmError> {
    use PlanEvent::*;
    use PlanStatus::*;

    let next = match (current, event) {
        (Ready, PlanStart) => Planning,
        (Ready, ImplementStart) => Implementing,
        // Restart after a crash or interrupt is an intentional self-loop.
        (Planning, PlanStart) => Planning,
        (Planning, PlannerFinished) => Ready,
        (Implementing, ImplementFinished) => Reviewing,
        (Reviewing, ReviewApproved) => Done,
        (Reviewing, ReviewChangesRequested) => Implementing,
        (Done, StartOver) => Planning,
        // Resume implementation without resetting the branch.
        (Done, Reimplement) => Implementing,
        // Retrigger review for an unmerged branch.
        (Done, RequestReview) => Reviewing,
        (Done, Cancel) => Cancelled,
        (Ready | Planning | Implementing | Reviewing, Cancel) => Cancelled,
        (Cancelled, Reopen) => Planning,
        (from, event) => return Err(FsmError::InvalidTransition { from, event }),
    };
    Ok(next)
}

enum FsmBackend {
    /// Local JSON file; the FSM holds the advisory lock across the whole
    /// read-modify-write.
    Local(LocalStore),
    /// Remote store; the server serialises concurrent writes.
    Remote(Box<dyn PlanStore>),
}

pub struct PlanFsm {
    backend: FsmBackend,
    project: String,
}

impl PlanFsm {
    pub fn new_local(store: LocalStore, project: impl Into<String>) -> Self {
        Self {
            backend: FsmBackend::Local(store),
            project: project.into(),
        }
    }

    pub fn new_remote(store: Box<dyn PlanStore>, project: impl Into<String>) -> Self {
        Self {
            backend: FsmBackend::Remote(store),
            project: project.into(),
        }
    }

    /// Applies `event` to the plan's current status. On an invalid
    /// transition nothing is written.
    pub fn transition(&self, plan_file: &str, event: PlanEvent) -> Result<PlanStatus, FsmError> {
        let new_status = match &self.backend {
            FsmBackend::Local(store) => store.with_plans_locked(|plans| {
                let entry = plans
                    .get_mut(plan_file)
                    .ok_or_else(|| StoreError::plan_not_found(plan_file))?;
                let next = apply_transition(entry.status, event)?;
                entry.status = next;
                Ok::<_, FsmError>(next)
            })?,
            FsmBackend::Remote(store) => {
                let mut entry = store.get(&self.project, plan_file)?;
                let next = apply_transition(entry.status, event)?;
                entry.status = next;
                store.update(&self.project, plan_file, entry)?;
                next
            }
        };
        info!(plan = plan_file, event = event.as_str(), status = new_status.as_str(), "plan transition");
        Ok(new_status)
    }

    /// Current status as the store sees it.
    pub fn status(&self, plan_file: &str) -> Result<PlanStatus, FsmError> {
        let entry = match &self.backend {
            FsmBackend::Local(store) => store.get(&self.project, plan_file)?,
            FsmBackend::Remote(store) => store.get(&self.project, plan_file)?,
        };
        Ok(entry.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::register_plan;
    use chrono::Utc;
    use kasmos_core::types::PlanStatus;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("kasmos-fsm-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    #[test]
    fn valid_transitions_follow_the_table() {
        use PlanEvent::*;
        use PlanStatus::*;

        let cases = [
            (Ready, PlanStart, Planning),
            (Planning, PlannerFinished, Ready),
            (Ready, ImplementStart, Implementing),
            (Implementing, ImplementFinished, Reviewing),
            (Reviewing, ReviewApproved, Done),
            (Reviewing, ReviewChangesRequested, Implementing),
            (Done, StartOver, Planning),
            (Done, Reimplement, Implementing),
            (Done, RequestReview, Reviewing),
            (Done, Cancel, Cancelled),
            (Ready, Cancel, Cancelled),
            (Planning, Cancel, Cancelled),
            (Implementing, Cancel, Cancelled),
            (Reviewing, Cancel, Cancelled),
            (Cancelled, Reopen, Planning),
        ];
        for (from, event, expected) in cases {
            let next = apply_transition(from, event)
                .unwrap_or_else(|err| panic!("{from} + {event} must be valid: {err}"));
            assert_eq!(next, expected, "{from} + {event}");
        }
    }

    #[test]
    fn planning_restart_self_loop_is_allowed() {
        let next = apply_transition(PlanStatus::Planning, PlanEvent::PlanStart)
            .expect("restart after crash");
        assert_eq!(next, PlanStatus::Planning);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        use PlanEvent::*;
        use PlanStatus::*;

        let cases = [
            (Ready, PlannerFinished),
            (Ready, ImplementFinished),
            (Ready, ReviewApproved),
            (Planning, ImplementStart),
            (Implementing, PlanStart),
            (Done, PlanStart),
            (Done, ImplementFinished),
            (Cancelled, ImplementStart),
            (Cancelled, Cancel),
        ];
        for (from, event) in cases {
            let err = apply_transition(from, event).expect_err("must be invalid");
            match err {
                FsmError::InvalidTransition {
                    from: got_from,
                    event: got_event,
                } => {
                    assert_eq!(got_from, from);
                    assert_eq!(got_event, event);
                }
                other => panic!("expected InvalidTransition, got {other:?}"),
            }
        }
    }

    #[test]
    fn user_only_events_are_exactly_the_five() {
        use PlanEvent::*;
        for event in [StartOver, Reimplement, RequestReview, Cancel, Reopen] {
            assert!(event.is_user_only(), "{event} must be user-only");
        }
        for event in [
            PlanStart,
            PlannerFinished,
            ImplementStart,
            ImplementFinished,
            ReviewApproved,
            ReviewChangesRequested,
        ] {
            assert!(!event.is_user_only(), "{event} must not be user-only");
        }
    }

    #[test]
    fn happy_path_drives_plan_to_done_and_out_of_unfinished() {
        let dir = unique_temp_dir("happy-path");
        let store = LocalStore::new(&dir);
        register_plan(
            &store,
            "proj",
            "2026-02-21-auth.md",
            "auth",
            "plan/auth",
            Utc::now(),
        )
        .expect("register");

        let fsm = PlanFsm::new_local(store.clone(), "proj");
        for (event, expected) in [
            (PlanEvent::PlanStart, PlanStatus::Planning),
            (PlanEvent::PlannerFinished, PlanStatus::Ready),
            (PlanEvent::ImplementStart, PlanStatus::Implementing),
            (PlanEvent::ImplementFinished, PlanStatus::Reviewing),
            (PlanEvent::ReviewApproved, PlanStatus::Done),
        ] {
            let next = fsm
                .transition("2026-02-21-auth.md", event)
                .unwrap_or_else(|err| panic!("{event} must apply: {err}"));
            assert_eq!(next, expected);
        }

        let state = crate::state::PlanState::load(&store, "proj").expect("load state");
        assert!(state.is_done("2026-02-21-auth.md"));
        assert!(state.unfinished().is_empty());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn replayed_events_match_in_memory_table() {
        let dir = unique_temp_dir("replay");
        let store = LocalStore::new(&dir);
        register_plan(
            &store,
            "proj",
            "2026-02-21-replay.md",
            "replay",
            "plan/replay",
            Utc::now(),
        )
        .expect("register");

        let events = [
            PlanEvent::PlanStart,
            PlanEvent::PlannerFinished,
            PlanEvent::ImplementStart,
            PlanEvent::ImplementFinished,
            PlanEvent::ReviewChangesRequested,
            PlanEvent::ImplementFinished,
            PlanEvent::ReviewApproved,
        ];

        let mut expected = PlanStatus::Ready;
        let fsm = PlanFsm::new_local(store.clone(), "proj");
        for event in events {
            expected = apply_transition(expected, event).expect("table accepts event");
            fsm.transition("2026-02-21-replay.md", event)
                .expect("store accepts event");
        }

        assert_eq!(
            fsm.status("2026-02-21-replay.md").expect("status"),
            expected
        );

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rejected_transition_leaves_disk_untouched() {
        let dir = unique_temp_dir("rejection");
        let store = LocalStore::new(&dir);
        register_plan(
            &store,
            "proj",
            "2026-02-21-auth.md",
            "auth",
            "plan/auth",
            Utc::now(),
        )
        .expect("register");

        let fsm = PlanFsm::new_local(store.clone(), "proj");
        let err = fsm
            .transition("2026-02-21-auth.md", PlanEvent::ImplementFinished)
            .expect_err("ready + implement_finished is invalid");
        assert!(matches!(err, FsmError::InvalidTransition { .. }));

        // Reload from disk: status must still be ready.
        let reloaded = LocalStore::new(&dir)
            .get("proj", "2026-02-21-auth.md")
            .expect("reload entry");
        assert_eq!(reloaded.status, PlanStatus::Ready);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn transition_on_missing_plan_is_not_found() {
        let dir = unique_temp_dir("missing");
        let store = LocalStore::new(&dir);
        let fsm = PlanFsm::new_local(store, "proj");

        let err = fsm
            .transition("2026-02-21-ghost.md", PlanEvent::PlanStart)
            .expect_err("missing plan");
        assert!(matches!(err, FsmError::Store(err) if err.is_not_found()));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn legacy_status_canonicalises_before_transition() {
        let dir = unique_temp_dir("legacy");
        let raw = format!(
            "{{\"2026-02-21-old.md\": {{\"filename\": \"2026-02-21-old.md\", \"status\": \"in_progress\", \"created_at\": \"{}\"}}}}",
            Utc::now().to_rfc3339()
        );
        fs::write(dir.join("plan-state.json"), raw).expect("seed legacy state");

        let fsm = PlanFsm::new_local(LocalStore::new(&dir), "proj");
        let next = fsm
            .transition("2026-02-21-old.md", PlanEvent::ImplementFinished)
            .expect("legacy in_progress behaves as implementing");
        assert_eq!(next, PlanStatus::Reviewing);

        let _ = fs::remove_dir_all(dir);
    }
}
