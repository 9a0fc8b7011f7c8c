//! Typed messages routed between the UI, supervisor, FSM and orchestrators.

use kasmos_plan::PlanState;
use kasmos_session::{InstanceMetadata, PermissionResponse};

/// A key event forwarded by the UI layer. Only the keys the core's
/// confirmation machinery consumes are modelled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Esc,
}

/// Snapshot produced by one metadata tick: per-instance results plus the
/// freshly reloaded plan state.
#[derive(Debug, Clone)]
pub struct MetadataResultMsg {
    pub results: Vec<InstanceMetadata>,
    pub plan_state: PlanState,
}

#[derive(Debug, Clone)]
pub enum AppMsg {
    /// Periodic timer tick; triggers a metadata poll.
    Tick,
    Key(Key),
    WindowSize {
        width: u16,
        height: u16,
    },
    MetadataResult(MetadataResultMsg),
    InstanceStarted {
        title: String,
    },
    PlanRefresh,
    KillPlanInstances {
        plan_file: String,
    },
    /// Start implementation of a plan (planner-exit confirmation accepted,
    /// or explicit user action).
    TriggerImplement {
        plan_file: String,
    },
    /// Planner-exit confirmation declined: remember the answer and drop the
    /// planner session.
    PlannerDismissed {
        plan_file: String,
        planner_title: String,
    },
    /// Queue a fresh planner session for the plan.
    PlannerPrompt {
        plan_file: String,
        prompt: String,
    },
    /// Advance to the next wave (or finish implementation after the last).
    WaveAdvance {
        plan_file: String,
    },
    /// Re-run the failed tasks of the current wave.
    WaveRetry {
        plan_file: String,
    },
    /// Drop the orchestrator and tear down the plan's instances.
    WaveAbort {
        plan_file: String,
    },
    /// A wave confirmation overlay was cancelled; re-arm the latch so the
    /// next tick can prompt again.
    WaveConfirmCancelled {
        plan_file: String,
    },
    /// User answered a permission prompt for an instance.
    PermissionDecision {
        title: String,
        cache_key: String,
        response: PermissionResponse,
    },
    Toast {
        message: String,
    },
    Quit,
}
