//! Wave orchestration for a single plan.

use std::collections::HashMap;

use kasmos_plan::{Plan, Task};

/// Orchestration state for the plan's waves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveState {
    /// Not started.
    Idle,
    /// Current wave's tasks are running.
    Running,
    /// Current wave finished, awaiting user confirmation.
    WaveComplete,
    /// All waves finished.
    AllComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

/// Drives wave-based parallel task execution for one plan. Lives in memory
/// only; the durable plan status stays with the FSM.
#[derive(Debug, Clone)]
pub struct WaveOrchestrator {
    plan_file: String,
    plan: Plan,
    state: WaveState,
    /// 0-based index into `plan.waves`.
    current_wave: usize,
    task_states: HashMap<u32, TaskStatus>,
    needs_confirm: bool,
}

impl WaveOrchestrator {
    pub fn new(plan_file: impl Into<String>, plan: Plan) -> Self {
        Self {
            plan_file: plan_file.into(),
            plan,
            state: WaveState::Idle,
            current_wave: 0,
            task_states: HashMap::new(),
            needs_confirm: false,
        }
    }

    pub fn state(&self) -> WaveState {
        self.state
    }

    pub fn plan_file(&self) -> &str {
        &self.plan_file
    }

    pub fn total_waves(&self) -> usize {
        self.plan.waves.len()
    }

    pub fn total_tasks(&self) -> usize {
        self.plan.total_tasks()
    }

    /// 1-indexed number of the active wave; 0 once all waves are done.
    pub fn current_wave_number(&self) -> u32 {
        match self.plan.waves.get(self.current_wave) {
            Some(wave) => wave.number,
            None => 0,
        }
    }

    pub fn current_wave_tasks(&self) -> &[Task] {
        self.plan
            .waves
            .get(self.current_wave)
            .map(|wave| wave.tasks.as_slice())
            .unwrap_or_default()
    }

    /// Plan header for inclusion in task prompts.
    pub fn header_context(&self) -> &str {
        self.plan.header_context()
    }

    /// Advances to the next wave and returns its tasks, empty when all
    /// waves have run. Only valid from `Idle` and `WaveComplete`.
    pub fn start_next_wave(&mut self) -> Vec<Task> {
        if self.state == WaveState::AllComplete {
            return Vec::new();
        }
        if self.state == WaveState::WaveComplete {
            self.current_wave += 1;
        }
        let Some(wave) = self.plan.waves.get(self.current_wave) else {
            self.state = WaveState::AllComplete;
            return Vec::new();
        };

        self.state = WaveState::Running;
        let tasks = wave.tasks.clone();
        for task in &tasks {
            self.task_states.insert(task.number, TaskStatus::Running);
        }
        tasks
    }

    pub fn mark_task_complete(&mut self, task_number: u32) {
        self.task_states.insert(task_number, TaskStatus::Complete);
        self.check_wave_complete();
    }

    /// Failed tasks do not stop the wave; the wave resolves when every task
    /// has completed or failed.
    pub fn mark_task_failed(&mut self, task_number: u32) {
        self.task_states.insert(task_number, TaskStatus::Failed);
        self.check_wave_complete();
    }

    pub fn is_current_wave_complete(&self) -> bool {
        matches!(self.state, WaveState::WaveComplete | WaveState::AllComplete)
    }

    /// True while a task in the current wave is still unresolved.
    pub fn task_running(&self, task_number: u32) -> bool {
        matches!(
            self.task_states.get(&task_number),
            Some(TaskStatus::Running) | Some(TaskStatus::Pending)
        )
    }

    pub fn completed_task_count(&self) -> usize {
        self.count_current_wave(TaskStatus::Complete)
    }

    pub fn failed_task_count(&self) -> usize {
        self.count_current_wave(TaskStatus::Failed)
    }

    /// Failed tasks of the current wave, in plan order.
    pub fn failed_tasks(&self) -> Vec<Task> {
        self.current_wave_tasks()
            .iter()
            .filter(|task| self.task_states.get(&task.number) == Some(&TaskStatus::Failed))
            .cloned()
            .collect()
    }

    /// Re-runs the current wave's failed tasks: flips them back to running
    /// and returns them for respawning.
    pub fn retry_failed_tasks(&mut self) -> Vec<Task> {
        let failed = self.failed_tasks();
        if failed.is_empty() {
            return failed;
        }
        for task in &failed {
            self.task_states.insert(task.number, TaskStatus::Running);
        }
        self.state = WaveState::Running;
        failed
    }

    /// One-shot confirmation latch: reads and clears. Returns `true` exactly
    /// once per wave completion; a user cancel must call `rearm_confirm` so
    /// the next tick can prompt again.
    pub fn needs_confirm(&mut self) -> bool {
        let armed = self.needs_confirm;
        self.needs_confirm = false;
        armed
    }

    /// Re-arms the latch after a cancelled confirmation, avoiding the
    /// stuck-wave deadlock.
    pub fn rearm_confirm(&mut self) {
        if self.is_current_wave_complete() {
            self.needs_confirm = true;
        }
    }

    /// Recomputes wave completion from a full snapshot of task states, so
    /// out-of-order completion messages converge on the same result.
    fn check_wave_complete(&mut self) {
        let Some(wave) = self.plan.waves.get(self.current_wave) else {
            return;
        };
        let unresolved = wave.tasks.iter().any(|task| {
            matches!(
                self.task_states.get(&task.number),
                None | Some(TaskStatus::Pending) | Some(TaskStatus::Running)
            )
        });
        if unresolved {
            return;
        }

        let was_complete = self.is_current_wave_complete();
        if self.current_wave + 1 >= self.plan.waves.len() {
            self.state = WaveState::AllComplete;
        } else {
            self.state = WaveState::WaveComplete;
        }
        if !was_complete {
            self.needs_confirm = true;
        }
    }

    fn count_current_wave(&self, status: TaskStatus) -> usize {
        self.current_wave_tasks()
            .iter()
            .filter(|task| self.task_states.get(&task.number) == Some(&status))
            .count()
    }
}
