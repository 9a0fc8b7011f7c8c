//! The application core: one update function owning every model mutation.
//!
//! Messages come from the UI, the timer, and the supervisor snapshots; the
//! update step applies them and returns effects for the runtime to execute.
//! No other thread mutates instances, orchestrators, or plan snapshots.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use kasmos_core::permission_cache::{cache_key, PermissionCache};
use kasmos_core::types::{display_name, AgentType, InstanceStatus, PlanStatus};
use kasmos_git::{plan_branch_from_file, task_branch};
use kasmos_plan::{parse_plan, PlanEvent, PlanFsm, PlanState, Task};
use kasmos_session::{
    send_permission_response, Instance, InstanceOptions, InstanceSupervisor, PermissionPrompt,
    PermissionResponse, TmuxAdapter, TmuxFactory,
};
use kasmos_store::PlanStore;
use tracing::warn;

use crate::messages::{AppMsg, Key, MetadataResultMsg};
use crate::wave::{WaveOrchestrator, WaveState};

/// Side effects the runtime executes after an update step.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Feed a message back into the queue.
    Dispatch(AppMsg),
    /// Run the metadata poll and enqueue its result.
    PollMetadata,
}

/// A pending modal confirmation. Every outcome is a message, so the accept
/// path, the cancel path, and the latch re-arm are all observable in tests.
#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub message: String,
    pub confirm_key: char,
    pub cancel_key: char,
    pub abort_key: Option<char>,
    pub on_confirm: Option<AppMsg>,
    pub on_cancel: Option<AppMsg>,
    pub on_abort: Option<AppMsg>,
    pub on_esc: Option<AppMsg>,
}

/// Wraps a shared factory so each instance can own a boxed handle.
#[derive(Clone)]
struct SharedFactory(Arc<dyn TmuxFactory + Send + Sync>);

impl TmuxFactory for SharedFactory {
    fn create(&self, session_name: &str, command: &str) -> Box<dyn TmuxAdapter> {
        self.0.create(session_name, command)
    }
}

pub struct AppOptions {
    pub project: String,
    pub repo_path: PathBuf,
    pub program: String,
    pub store: Box<dyn PlanStore>,
    pub fsm: PlanFsm,
    pub permission_cache: PermissionCache,
    pub tmux_factory: Arc<dyn TmuxFactory + Send + Sync>,
}

pub struct AppCore {
    project: String,
    repo_path: PathBuf,
    program: String,
    pub supervisor: InstanceSupervisor,
    store: Box<dyn PlanStore>,
    fsm: PlanFsm,
    pub permission_cache: PermissionCache,
    pub plan_state: PlanState,
    pub wave_orchestrators: HashMap<String, WaveOrchestrator>,
    /// Plans whose planner-exit question the user has already answered;
    /// prevents re-open loops on every tick.
    pub planner_prompted: HashMap<String, bool>,
    pub pending_confirm: Option<ConfirmRequest>,
    pub toasts: Vec<String>,
    tmux_factory: SharedFactory,
}

impl AppCore {
    pub fn new(options: AppOptions) -> Self {
        Self {
            project: options.project,
            repo_path: options.repo_path,
            program: options.program,
            supervisor: InstanceSupervisor::new(),
            store: options.store,
            fsm: options.fsm,
            permission_cache: options.permission_cache,
            plan_state: PlanState::default(),
            wave_orchestrators: HashMap::new(),
            planner_prompted: HashMap::new(),
            pending_confirm: None,
            toasts: Vec::new(),
            tmux_factory: SharedFactory(options.tmux_factory),
        }
    }

    /// One update step. Applies the message to the model and returns the
    /// effects for the runtime.
    pub fn update(&mut self, msg: AppMsg) -> Vec<Effect> {
        match msg {
            AppMsg::Tick | AppMsg::PlanRefresh => vec![Effect::PollMetadata],
            AppMsg::WindowSize { .. } => Vec::new(),
            AppMsg::Key(key) => self.handle_key(key),
            AppMsg::MetadataResult(result) => self.process_metadata(result),
            AppMsg::InstanceStarted { title } => {
                if let Some(instance) = self.supervisor.get_mut(&title) {
                    instance.set_status(InstanceStatus::Running);
                }
                Vec::new()
            }
            AppMsg::KillPlanInstances { plan_file } => {
                let killed = self.supervisor.kill_plan_instances(&plan_file);
                self.wave_orchestrators.remove(&plan_file);
                self.toast(format!(
                    "killed {killed} session(s) for {}",
                    display_name(&plan_file)
                ));
                Vec::new()
            }
            AppMsg::TriggerImplement { plan_file } => self.trigger_implement(&plan_file),
            AppMsg::PlannerDismissed {
                plan_file,
                planner_title,
            } => {
                self.planner_prompted.insert(plan_file, true);
                if let Err(err) = self.supervisor.kill_instance(&planner_title) {
                    warn!(title = %planner_title, error = %err, "failed to kill planner");
                }
                Vec::new()
            }
            AppMsg::PlannerPrompt { plan_file, prompt } => {
                self.spawn_planner(&plan_file, &prompt)
            }
            AppMsg::WaveAdvance { plan_file } => self.advance_wave(&plan_file),
            AppMsg::WaveRetry { plan_file } => self.retry_wave(&plan_file),
            AppMsg::WaveAbort { plan_file } => {
                self.wave_orchestrators.remove(&plan_file);
                let killed = self.supervisor.kill_plan_instances(&plan_file);
                self.toast(format!(
                    "aborted {} ({killed} session(s) torn down)",
                    display_name(&plan_file)
                ));
                Vec::new()
            }
            AppMsg::WaveConfirmCancelled { plan_file } => {
                if let Some(orch) = self.wave_orchestrators.get_mut(&plan_file) {
                    orch.rearm_confirm();
                }
                Vec::new()
            }
            AppMsg::PermissionDecision {
                title,
                cache_key,
                response,
            } => {
                self.apply_permission_decision(&title, &cache_key, response);
                Vec::new()
            }
            AppMsg::Toast { message } => {
                self.toast(message);
                Vec::new()
            }
            AppMsg::Quit => Vec::new(),
        }
    }

    /// Executes the metadata poll: supervisor snapshots plus a store reload.
    /// A failed reload degrades to the previous snapshot instead of killing
    /// the tick.
    pub fn poll_metadata(&mut self) -> AppMsg {
        let results = self.supervisor.poll_metadata();
        let plan_state = match PlanState::load(self.store.as_ref(), &self.project) {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "plan store reload failed; keeping last snapshot");
                self.plan_state.clone()
            }
        };
        AppMsg::MetadataResult(MetadataResultMsg {
            results,
            plan_state,
        })
    }

    fn toast(&mut self, message: impl Into<String>) {
        self.toasts.push(message.into());
    }

    // --- confirmation machinery -------------------------------------------

    fn handle_key(&mut self, key: Key) -> Vec<Effect> {
        let Some(confirm) = self.pending_confirm.take() else {
            return Vec::new();
        };

        let action = match key {
            Key::Esc => confirm.on_esc.clone(),
            Key::Enter => confirm.on_confirm.clone(),
            Key::Char(c) if c == confirm.confirm_key => confirm.on_confirm.clone(),
            Key::Char(c) if c == confirm.cancel_key => confirm.on_cancel.clone(),
            Key::Char(c) if confirm.abort_key == Some(c) => confirm.on_abort.clone(),
            _ => {
                // Unhandled key: keep the overlay up.
                self.pending_confirm = Some(confirm);
                return Vec::new();
            }
        };
        match action {
            Some(msg) => vec![Effect::Dispatch(msg)],
            None => Vec::new(),
        }
    }

    fn permission_confirm(title: &str, prompt: &PermissionPrompt, key: String) -> ConfirmRequest {
        ConfirmRequest {
            message: format!(
                "{title} requests permission: {} ({})  y=always  o=once  r=reject",
                prompt.description,
                if prompt.pattern.is_empty() {
                    "no pattern"
                } else {
                    prompt.pattern.as_str()
                }
            ),
            confirm_key: 'y',
            cancel_key: 'o',
            abort_key: Some('r'),
            on_confirm: Some(AppMsg::PermissionDecision {
                title: title.to_string(),
                cache_key: key.clone(),
                response: PermissionResponse::AllowAlways,
            }),
            on_cancel: Some(AppMsg::PermissionDecision {
                title: title.to_string(),
                cache_key: key.clone(),
                response: PermissionResponse::AllowOnce,
            }),
            on_abort: Some(AppMsg::PermissionDecision {
                title: title.to_string(),
                cache_key: key,
                response: PermissionResponse::Reject,
            }),
            on_esc: None,
        }
    }

    fn planner_exit_confirm(plan_file: &str, planner_title: &str) -> ConfirmRequest {
        ConfirmRequest {
            message: format!(
                "Plan '{}' is ready. Start implementation?",
                display_name(plan_file)
            ),
            confirm_key: 'y',
            cancel_key: 'n',
            abort_key: None,
            on_confirm: Some(AppMsg::TriggerImplement {
                plan_file: plan_file.to_string(),
            }),
            on_cancel: Some(AppMsg::PlannerDismissed {
                plan_file: plan_file.to_string(),
                planner_title: planner_title.to_string(),
            }),
            on_abort: None,
            // Esc deliberately leaves `planner_prompted` unset so the next
            // tick can re-open the question.
            on_esc: None,
        }
    }

    fn wave_advance_confirm(plan_file: &str, orch: &WaveOrchestrator) -> ConfirmRequest {
        let message = if orch.state() == WaveState::AllComplete {
            format!(
                "All waves complete for '{}'. Finish implementation and start review?",
                display_name(plan_file)
            )
        } else {
            format!(
                "Wave {} complete ({} task(s) done). Start the next wave?",
                orch.current_wave_number(),
                orch.completed_task_count()
            )
        };
        ConfirmRequest {
            message,
            confirm_key: 'y',
            cancel_key: 'n',
            abort_key: None,
            on_confirm: Some(AppMsg::WaveAdvance {
                plan_file: plan_file.to_string(),
            }),
            on_cancel: Some(AppMsg::WaveConfirmCancelled {
                plan_file: plan_file.to_string(),
            }),
            on_abort: None,
            on_esc: Some(AppMsg::WaveConfirmCancelled {
                plan_file: plan_file.to_string(),
            }),
        }
    }

    fn wave_failed_confirm(plan_file: &str, orch: &WaveOrchestrator) -> ConfirmRequest {
        ConfirmRequest {
            message: format!(
                "Wave {} finished with {} failed task(s). r=retry  s=skip  a=abort",
                orch.current_wave_number(),
                orch.failed_task_count()
            ),
            confirm_key: 'r',
            cancel_key: 's',
            abort_key: Some('a'),
            on_confirm: Some(AppMsg::WaveRetry {
                plan_file: plan_file.to_string(),
            }),
            on_cancel: Some(AppMsg::WaveAdvance {
                plan_file: plan_file.to_string(),
            }),
            on_abort: Some(AppMsg::WaveAbort {
                plan_file: plan_file.to_string(),
            }),
            on_esc: Some(AppMsg::WaveConfirmCancelled {
                plan_file: plan_file.to_string(),
            }),
        }
    }

    // --- metadata processing ----------------------------------------------

    fn process_metadata(&mut self, msg: MetadataResultMsg) -> Vec<Effect> {
        self.plan_state = msg.plan_state;
        let mut effects = Vec::new();

        for meta in &msg.results {
            // Rule 1: permission prompts trump lifecycle handling.
            if let Some(prompt) = &meta.permission_prompt {
                let key = cache_key(&prompt.pattern, &prompt.description).to_string();
                if self.permission_cache.is_allowed_always(&key) {
                    if let Some(tmux) = self
                        .supervisor
                        .get_mut(&meta.title)
                        .and_then(Instance::tmux_mut)
                    {
                        if let Err(err) =
                            send_permission_response(tmux, PermissionResponse::AllowAlways)
                        {
                            warn!(title = %meta.title, error = %err, "auto-approve failed");
                        }
                    }
                } else if self.pending_confirm.is_none() {
                    self.pending_confirm =
                        Some(Self::permission_confirm(&meta.title, prompt, key));
                }
                continue;
            }

            if meta.tmux_alive {
                continue;
            }

            // Rule 2: planner finished naturally (status back to ready).
            if meta.agent_type == AgentType::Planner {
                let Some(plan_file) = &meta.plan_file else {
                    continue;
                };
                let already_prompted = self
                    .planner_prompted
                    .get(plan_file)
                    .copied()
                    .unwrap_or(false);
                if self.plan_state.status(plan_file) == Some(PlanStatus::Ready)
                    && !already_prompted
                    && self.pending_confirm.is_none()
                {
                    self.pending_confirm =
                        Some(Self::planner_exit_confirm(plan_file, &meta.title));
                }
                continue;
            }

            // Rule 3: reviewer exit completes the review. The status guard
            // keeps a plan that is already done from ever re-entering this
            // path, which would otherwise spawn reviewers forever.
            if meta.is_reviewer {
                if let Some(plan_file) = meta.plan_file.clone() {
                    if self.plan_state.status(&plan_file) == Some(PlanStatus::Reviewing) {
                        match self.fsm.transition(&plan_file, PlanEvent::ReviewApproved) {
                            Ok(next) => {
                                self.plan_state.set_status(&plan_file, next);
                                self.toast(format!("{} is done", display_name(&plan_file)));
                            }
                            Err(err) => {
                                warn!(plan = %plan_file, error = %err, "review transition failed")
                            }
                        }
                    }
                }
                self.remove_instance(&meta.title);
                continue;
            }

            // Rule 4: coder exit resolves its wave task. A clean exit counts
            // as complete; a paused session counts as failed.
            if meta.agent_type == AgentType::Coder {
                if let (Some(plan_file), Some(task_number)) =
                    (meta.plan_file.clone(), meta.task_number)
                {
                    if let Some(orch) = self.wave_orchestrators.get_mut(&plan_file) {
                        if orch.task_running(task_number) {
                            if meta.status == InstanceStatus::Paused {
                                orch.mark_task_failed(task_number);
                            } else {
                                orch.mark_task_complete(task_number);
                            }
                        }
                    }
                }
                self.remove_instance(&meta.title);
                continue;
            }

            // Rule 5: solo agents have no plan association; a dead pane is
            // simply cleaned up.
            self.remove_instance(&meta.title);
        }

        // A task with no backing instance can never resolve; count it as
        // failed so the wave cannot block forever.
        for (plan_file, orch) in &mut self.wave_orchestrators {
            if orch.state() != WaveState::Running {
                continue;
            }
            let wave_number = orch.current_wave_number();
            let task_numbers: Vec<u32> = orch
                .current_wave_tasks()
                .iter()
                .map(|task| task.number)
                .collect();
            for task_number in task_numbers {
                if orch.task_running(task_number)
                    && self
                        .supervisor
                        .find_task(plan_file, wave_number, task_number)
                        .is_none()
                {
                    orch.mark_task_failed(task_number);
                }
            }
        }

        // Wave completion confirmations (advance, or the retry/skip/abort
        // decision when tasks failed).
        for (plan_file, orch) in &mut self.wave_orchestrators {
            if self.pending_confirm.is_some() {
                break;
            }
            if !orch.needs_confirm() {
                continue;
            }
            let request = if orch.failed_task_count() > 0 {
                Self::wave_failed_confirm(plan_file, orch)
            } else {
                Self::wave_advance_confirm(plan_file, orch)
            };
            self.pending_confirm = Some(request);
        }

        // A plan under review must have a reviewer session. Guarded on the
        // (freshly updated) reviewing status, never on done.
        let needs_reviewer: Vec<String> = self
            .plan_state
            .entries()
            .filter(|entry| entry.status == PlanStatus::Reviewing)
            .map(|entry| entry.filename.clone())
            .filter(|plan_file| {
                !self.supervisor.instances().iter().any(|inst| {
                    inst.is_reviewer && inst.plan_file.as_deref() == Some(plan_file)
                })
            })
            .collect();
        for plan_file in needs_reviewer {
            effects.extend(self.spawn_reviewer(&plan_file));
        }

        effects
    }

    fn remove_instance(&mut self, title: &str) {
        if let Err(err) = self.supervisor.kill_instance(title) {
            warn!(title = %title, error = %err, "instance teardown failed");
        }
    }

    fn apply_permission_decision(
        &mut self,
        title: &str,
        key: &str,
        response: PermissionResponse,
    ) {
        if response == PermissionResponse::AllowAlways {
            self.permission_cache.remember(key);
            if let Err(err) = self.permission_cache.save() {
                warn!(error = %err, "failed to persist permission cache");
            }
        }
        if let Some(tmux) = self.supervisor.get_mut(title).and_then(Instance::tmux_mut) {
            if let Err(err) = send_permission_response(tmux, response) {
                warn!(title = %title, error = %err, "permission response failed");
            }
        }
    }

    // --- plan stage handling ----------------------------------------------

    fn trigger_implement(&mut self, plan_file: &str) -> Vec<Effect> {
        self.planner_prompted.insert(plan_file.to_string(), true);

        let planner_titles: Vec<String> = self
            .supervisor
            .instances()
            .iter()
            .filter(|inst| {
                inst.agent_type == AgentType::Planner
                    && inst.plan_file.as_deref() == Some(plan_file)
            })
            .map(|inst| inst.title.clone())
            .collect();
        for title in planner_titles {
            self.remove_instance(&title);
        }

        let content = match self.store.get_content(&self.project, plan_file) {
            Ok(content) => content,
            Err(err) => {
                warn!(plan = %plan_file, error = %err, "no plan content");
                String::new()
            }
        };
        let plan = parse_plan(&content);

        if plan.waves.is_empty() {
            // Not a user-facing error: the plan needs re-planning with wave
            // structure, so queue a planner with an annotation prompt.
            match self.fsm.transition(plan_file, PlanEvent::PlanStart) {
                Ok(next) => self.plan_state.set_status(plan_file, next),
                Err(err) => warn!(plan = %plan_file, error = %err, "replan transition failed"),
            }
            self.toast(format!(
                "{} has no waves; planner re-queued",
                display_name(plan_file)
            ));
            let prompt = format!(
                "The plan {plan_file} has no `## Wave` headers. Revise it so every task \
                 sits in a `## Wave <n>` section with `### Task <n>: <title>` entries, \
                 grouping tasks that can run in parallel into the same Wave."
            );
            return self.spawn_planner(plan_file, &prompt);
        }

        match self.fsm.transition(plan_file, PlanEvent::ImplementStart) {
            Ok(next) => self.plan_state.set_status(plan_file, next),
            Err(err) => {
                self.toast(format!("cannot start implementation: {err}"));
                return Vec::new();
            }
        }

        let mut orch = WaveOrchestrator::new(plan_file, plan);
        let tasks = orch.start_next_wave();
        let wave_number = orch.current_wave_number();
        let header = orch.header_context().to_string();
        self.wave_orchestrators.insert(plan_file.to_string(), orch);
        self.spawn_wave_tasks(plan_file, wave_number, &header, &tasks)
    }

    fn advance_wave(&mut self, plan_file: &str) -> Vec<Effect> {
        let Some(orch) = self.wave_orchestrators.get_mut(plan_file) else {
            return Vec::new();
        };
        let tasks = orch.start_next_wave();
        if tasks.is_empty() {
            self.wave_orchestrators.remove(plan_file);
            match self.fsm.transition(plan_file, PlanEvent::ImplementFinished) {
                Ok(next) => self.plan_state.set_status(plan_file, next),
                Err(err) => {
                    self.toast(format!("cannot finish implementation: {err}"));
                    return Vec::new();
                }
            }
            return self.spawn_reviewer(plan_file);
        }

        let wave_number = orch.current_wave_number();
        let header = orch.header_context().to_string();
        self.spawn_wave_tasks(plan_file, wave_number, &header, &tasks)
    }

    fn retry_wave(&mut self, plan_file: &str) -> Vec<Effect> {
        let Some(orch) = self.wave_orchestrators.get_mut(plan_file) else {
            return Vec::new();
        };
        let tasks = orch.retry_failed_tasks();
        let wave_number = orch.current_wave_number();
        let header = orch.header_context().to_string();
        self.spawn_wave_tasks(plan_file, wave_number, &header, &tasks)
    }

    // --- spawning ---------------------------------------------------------

    fn spawn_planner(&mut self, plan_file: &str, prompt: &str) -> Vec<Effect> {
        let title = format!("{}-planner", display_name(plan_file));
        let options = InstanceOptions {
            title: title.clone(),
            path: self.repo_path.clone(),
            program: self.program.clone(),
            plan_file: Some(plan_file.to_string()),
            agent_type: AgentType::Planner,
            queued_prompt: Some(prompt.to_string()),
            ..InstanceOptions::default()
        };
        self.spawn_on_main(options)
    }

    fn spawn_reviewer(&mut self, plan_file: &str) -> Vec<Effect> {
        let title = format!("{}-reviewer", display_name(plan_file));
        let branch = plan_branch_from_file(plan_file);
        let prompt = format!(
            "Review the implementation of plan {plan_file}. Check every task branch \
             merged into {branch}, verify the changes against the plan, and exit when \
             the review is complete."
        );
        let options = InstanceOptions {
            title: title.clone(),
            path: self.repo_path.clone(),
            program: self.program.clone(),
            plan_file: Some(plan_file.to_string()),
            agent_type: AgentType::Reviewer,
            queued_prompt: Some(prompt),
            ..InstanceOptions::default()
        };
        self.spawn_on_branch(options, &branch)
    }

    fn spawn_wave_tasks(
        &mut self,
        plan_file: &str,
        wave_number: u32,
        header: &str,
        tasks: &[Task],
    ) -> Vec<Effect> {
        let plan_branch = plan_branch_from_file(plan_file);
        let peers = tasks.len() as u32;
        let mut effects = Vec::new();
        let mut failed = Vec::new();

        for task in tasks {
            let branch = task_branch(&plan_branch, task.number);
            let title = format!("{}-t{}", display_name(plan_file), task.number);
            let prompt = coder_prompt(header, task);
            let options = InstanceOptions {
                title,
                path: self.repo_path.clone(),
                program: self.program.clone(),
                plan_file: Some(plan_file.to_string()),
                wave_number: Some(wave_number),
                task_number: Some(task.number),
                peers: Some(peers),
                agent_type: AgentType::Coder,
                queued_prompt: Some(prompt),
            };
            let spawned = self.spawn_on_branch(options, &branch);
            if spawned.is_empty() {
                failed.push(task.number);
            } else {
                effects.extend(spawned);
            }
        }

        if let Some(orch) = self.wave_orchestrators.get_mut(plan_file) {
            for task_number in failed {
                orch.mark_task_failed(task_number);
            }
        }
        effects
    }

    fn spawn_on_main(&mut self, options: InstanceOptions) -> Vec<Effect> {
        let title = options.title.clone();
        match Instance::new(options, Box::new(self.tmux_factory.clone())) {
            Ok(mut instance) => match instance.start_on_main_branch() {
                Ok(()) => {
                    self.supervisor.add(instance);
                    vec![Effect::Dispatch(AppMsg::InstanceStarted { title })]
                }
                Err(err) => {
                    self.toast(format!("failed to start {title}: {err}"));
                    Vec::new()
                }
            },
            Err(err) => {
                self.toast(format!("failed to create {title}: {err}"));
                Vec::new()
            }
        }
    }

    fn spawn_on_branch(&mut self, options: InstanceOptions, branch: &str) -> Vec<Effect> {
        let title = options.title.clone();
        match Instance::new(options, Box::new(self.tmux_factory.clone())) {
            Ok(mut instance) => match instance.start_on_branch(branch) {
                Ok(()) => {
                    self.supervisor.add(instance);
                    vec![Effect::Dispatch(AppMsg::InstanceStarted { title })]
                }
                Err(err) => {
                    self.toast(format!("failed to start {title}: {err}"));
                    Vec::new()
                }
            },
            Err(err) => {
                self.toast(format!("failed to create {title}: {err}"));
                Vec::new()
            }
        }
    }
}

/// Prompt handed to a coder instance: plan header for context, then the
/// task itself.
fn coder_prompt(header: &str, task: &Task) -> String {
    let mut prompt = String::new();
    if !header.is_empty() {
        prompt.push_str(header);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!("## Task {}: {}\n\n{}", task.number, task.title, task.body));
    prompt
}
