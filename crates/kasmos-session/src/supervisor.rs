//! Instance supervisor: owns the live agent sessions and produces the
//! periodic metadata snapshots the app update loop consumes.

use kasmos_core::types::{AgentType, InstanceStatus};
use tracing::warn;

use crate::error::SessionError;
use crate::instance::Instance;

/// A permission request parsed out of a harness pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPrompt {
    pub description: String,
    /// Glob-ish pattern shown under the prompt's "Patterns" section; empty
    /// when the prompt type has none (the description is the cache key then).
    pub pattern: String,
}

/// Read-only snapshot of one instance, taken on the metadata tick. All
/// decisions happen later, in the app update step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMetadata {
    pub title: String,
    pub tmux_alive: bool,
    pub status: InstanceStatus,
    pub agent_type: AgentType,
    pub is_reviewer: bool,
    pub plan_file: Option<String>,
    pub wave_number: Option<u32>,
    pub task_number: Option<u32>,
    pub permission_prompt: Option<PermissionPrompt>,
}

/// Parses a harness permission prompt from captured pane text.
///
/// The opencode shape:
/// ```text
/// △ Permission required
///   ← Access external directory /opt
///
/// Patterns
///
/// - /opt/*
/// ```
pub fn parse_permission_prompt(content: &str) -> Option<PermissionPrompt> {
    let mut lines = content.lines();
    lines.by_ref().find(|line| line.contains("Permission required"))?;

    let description = lines
        .by_ref()
        .map(|line| line.trim().trim_start_matches(['←', '→']).trim())
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string();

    let mut pattern = String::new();
    let mut in_patterns = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed == "Patterns" {
            in_patterns = true;
            continue;
        }
        if in_patterns {
            if let Some(rest) = trimmed.strip_prefix("- ") {
                pattern = rest.trim().to_string();
                break;
            }
        }
    }

    Some(PermissionPrompt {
        description,
        pattern,
    })
}

/// Owns every live instance. The UI sees read-only views; lifecycle
/// decisions flow back in as messages handled by the app update loop.
#[derive(Default)]
pub struct InstanceSupervisor {
    instances: Vec<Instance>,
}

impl InstanceSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, instance: Instance) {
        self.instances.push(instance);
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn get(&self, title: &str) -> Option<&Instance> {
        self.instances.iter().find(|inst| inst.title == title)
    }

    pub fn get_mut(&mut self, title: &str) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|inst| inst.title == title)
    }

    /// The instance running a specific task of a specific plan wave.
    pub fn find_task(
        &self,
        plan_file: &str,
        wave_number: u32,
        task_number: u32,
    ) -> Option<&Instance> {
        self.instances.iter().find(|inst| {
            inst.plan_file.as_deref() == Some(plan_file)
                && inst.wave_number == Some(wave_number)
                && inst.task_number == Some(task_number)
        })
    }

    /// Removes the instance without touching its pane or worktree.
    pub fn remove(&mut self, title: &str) -> Option<Instance> {
        let index = self.instances.iter().position(|inst| inst.title == title)?;
        Some(self.instances.remove(index))
    }

    /// Kills the pane and worktree, then drops the instance.
    pub fn kill_instance(&mut self, title: &str) -> Result<bool, SessionError> {
        match self.remove(title) {
            Some(mut instance) => {
                instance.kill()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tears down every instance belonging to a plan (user kill or plan
    /// cancel). Returns how many were removed; teardown failures are logged
    /// and do not abort the sweep.
    pub fn kill_plan_instances(&mut self, plan_file: &str) -> usize {
        let mut killed = 0;
        let mut remaining = Vec::with_capacity(self.instances.len());
        for mut instance in self.instances.drain(..) {
            if instance.plan_file.as_deref() == Some(plan_file) {
                if let Err(err) = instance.kill() {
                    warn!(title = %instance.title, error = %err, "failed to kill plan instance");
                }
                killed += 1;
            } else {
                remaining.push(instance);
            }
        }
        self.instances = remaining;
        killed
    }

    /// The metadata tick: snapshot every live instance. Reads panes and
    /// refreshes cached content; never mutates lifecycle state — the app
    /// update step decides what the snapshots mean.
    pub fn poll_metadata(&mut self) -> Vec<InstanceMetadata> {
        let mut results = Vec::with_capacity(self.instances.len());
        for instance in &mut self.instances {
            if !instance.started() {
                continue;
            }
            let tmux_alive = instance.tmux_alive();
            let permission_prompt = if tmux_alive {
                match instance.capture_pane() {
                    Ok(content) => {
                        parse_permission_prompt(&String::from_utf8_lossy(content).into_owned())
                    }
                    Err(err) => {
                        warn!(title = %instance.title, error = %err, "pane capture failed");
                        None
                    }
                }
            } else {
                None
            };
            instance.prompt_detected = permission_prompt.is_some();

            results.push(InstanceMetadata {
                title: instance.title.clone(),
                tmux_alive,
                status: instance.status,
                agent_type: instance.agent_type,
                is_reviewer: instance.is_reviewer,
                plan_file: instance.plan_file.clone(),
                wave_number: instance.wave_number,
                task_number: instance.task_number,
                permission_prompt,
            });
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Instance, InstanceOptions};
    use crate::testing::MockTmuxFactory;
    use kasmos_core::types::AgentType;

    const PERMISSION_PANE: &str = "\
△ Permission required
  ← Access external directory /opt

Patterns

- /opt/*
";

    fn mk_started(
        title: &str,
        plan_file: Option<&str>,
        wave: Option<u32>,
        task: Option<u32>,
        factory: &MockTmuxFactory,
    ) -> Instance {
        let mut inst = Instance::new(
            InstanceOptions {
                title: title.to_string(),
                path: std::env::temp_dir(),
                program: "claude".to_string(),
                plan_file: plan_file.map(str::to_string),
                wave_number: wave,
                task_number: task,
                agent_type: if plan_file.is_some() {
                    AgentType::Coder
                } else {
                    AgentType::Solo
                },
                ..InstanceOptions::default()
            },
            Box::new(factory.clone()),
        )
        .expect("new instance");
        inst.start_on_main_branch().expect("start");
        inst
    }

    #[test]
    fn parse_permission_prompt_extracts_description_and_pattern() {
        let prompt = parse_permission_prompt(PERMISSION_PANE).expect("prompt detected");
        assert_eq!(prompt.description, "Access external directory /opt");
        assert_eq!(prompt.pattern, "/opt/*");
    }

    #[test]
    fn parse_permission_prompt_without_patterns_section() {
        let prompt = parse_permission_prompt("△ Permission required\n  Execute bash command\n")
            .expect("prompt detected");
        assert_eq!(prompt.description, "Execute bash command");
        assert_eq!(prompt.pattern, "");
    }

    #[test]
    fn parse_permission_prompt_on_plain_output_is_none() {
        assert!(parse_permission_prompt("compiling...\nall tests passed\n").is_none());
    }

    #[test]
    fn poll_metadata_reports_liveness_and_prompts() {
        let factory = MockTmuxFactory::new();
        let mut supervisor = InstanceSupervisor::new();
        supervisor.add(mk_started("alive-one", None, None, None, &factory));
        let alive_state = factory.last_state().expect("pane state");
        supervisor.add(mk_started("dead-one", None, None, None, &factory));
        let dead_state = factory.last_state().expect("pane state");

        alive_state.lock().expect("state").pane_content = PERMISSION_PANE.as_bytes().to_vec();
        dead_state.lock().expect("state").alive = false;

        let results = supervisor.poll_metadata();
        assert_eq!(results.len(), 2);

        let alive = results.iter().find(|m| m.title == "alive-one").expect("alive");
        assert!(alive.tmux_alive);
        let prompt = alive.permission_prompt.as_ref().expect("prompt");
        assert_eq!(prompt.pattern, "/opt/*");

        let dead = results.iter().find(|m| m.title == "dead-one").expect("dead");
        assert!(!dead.tmux_alive);
        assert!(dead.permission_prompt.is_none());
    }

    #[test]
    fn find_task_matches_plan_wave_and_task() {
        let factory = MockTmuxFactory::new();
        let mut supervisor = InstanceSupervisor::new();
        supervisor.add(mk_started(
            "auth-t1",
            Some("2026-02-21-auth.md"),
            Some(1),
            Some(1),
            &factory,
        ));
        supervisor.add(mk_started(
            "auth-t2",
            Some("2026-02-21-auth.md"),
            Some(1),
            Some(2),
            &factory,
        ));

        let found = supervisor
            .find_task("2026-02-21-auth.md", 1, 2)
            .expect("task found");
        assert_eq!(found.title, "auth-t2");
        assert!(supervisor.find_task("2026-02-21-auth.md", 2, 1).is_none());
        assert!(supervisor.find_task("other.md", 1, 1).is_none());
    }

    #[test]
    fn kill_plan_instances_removes_only_that_plan() {
        let factory = MockTmuxFactory::new();
        let mut supervisor = InstanceSupervisor::new();
        supervisor.add(mk_started(
            "auth-t1",
            Some("2026-02-21-auth.md"),
            Some(1),
            Some(1),
            &factory,
        ));
        supervisor.add(mk_started("solo", None, None, None, &factory));

        let killed = supervisor.kill_plan_instances("2026-02-21-auth.md");
        assert_eq!(killed, 1);
        assert_eq!(supervisor.len(), 1);
        assert!(supervisor.get("solo").is_some());
        assert!(supervisor.get("auth-t1").is_none());
    }

    #[test]
    fn kill_instance_reports_whether_found() {
        let factory = MockTmuxFactory::new();
        let mut supervisor = InstanceSupervisor::new();
        supervisor.add(mk_started("victim", None, None, None, &factory));
        let state = factory.last_state().expect("pane state");

        assert!(supervisor.kill_instance("victim").expect("kill"));
        assert!(state.lock().expect("state").killed);
        assert!(!supervisor.kill_instance("victim").expect("second kill"));
    }
}
