//! A single agent session hosted in a multiplexer pane.

use std::path::{Path, PathBuf};

use kasmos_core::types::{AgentType, InstanceStatus};
use kasmos_git::{discover_repo, DiffStats, GitCli, PlanWorktree};
use tracing::info;

use crate::error::SessionError;
use crate::harness::{harness_for, shell_quote, supports_cli_prompt, AgentConfig};
use crate::tmux::{TmuxAdapter, TmuxFactory};

#[derive(Debug, Clone, Default)]
pub struct InstanceOptions {
    pub title: String,
    /// Repository root the agent works in.
    pub path: PathBuf,
    pub program: String,
    pub plan_file: Option<String>,
    pub wave_number: Option<u32>,
    pub task_number: Option<u32>,
    /// Number of sibling tasks running in the same wave.
    pub peers: Option<u32>,
    pub agent_type: AgentType,
    pub queued_prompt: Option<String>,
}

/// One agent pane: identity, plan association, execution state, and the
/// exclusive handle to its tmux session. Mutated only by the supervisor and
/// the app update loop.
pub struct Instance {
    pub title: String,
    pub path: PathBuf,
    pub program: String,
    pub plan_file: Option<String>,
    pub wave_number: Option<u32>,
    pub task_number: Option<u32>,
    pub peers: Option<u32>,
    pub agent_type: AgentType,
    /// Denormalised from `agent_type` for hot-path checks in the tick.
    pub is_reviewer: bool,
    pub branch: Option<String>,
    pub status: InstanceStatus,
    pub prompt_detected: bool,
    pub cached_pane_content: Vec<u8>,
    pub queued_prompt: Option<String>,
    pub initial_prompt_transferred: bool,
    worktree: Option<PlanWorktree>,
    tmux: Option<Box<dyn TmuxAdapter>>,
    factory: Box<dyn TmuxFactory>,
    git: GitCli,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("title", &self.title)
            .field("path", &self.path)
            .field("program", &self.program)
            .field("plan_file", &self.plan_file)
            .field("wave_number", &self.wave_number)
            .field("task_number", &self.task_number)
            .field("peers", &self.peers)
            .field("agent_type", &self.agent_type)
            .field("is_reviewer", &self.is_reviewer)
            .field("branch", &self.branch)
            .field("status", &self.status)
            .field("prompt_detected", &self.prompt_detected)
            .field("cached_pane_content", &self.cached_pane_content)
            .field("queued_prompt", &self.queued_prompt)
            .field(
                "initial_prompt_transferred",
                &self.initial_prompt_transferred,
            )
            .field("worktree", &self.worktree)
            .field("tmux", &self.tmux.is_some())
            .field("git", &self.git)
            .finish()
    }
}

impl Instance {
    pub fn new(
        options: InstanceOptions,
        factory: Box<dyn TmuxFactory>,
    ) -> Result<Self, SessionError> {
        if options.title.is_empty() {
            return Err(SessionError::InvalidOptions {
                message: "title must not be empty".to_string(),
            });
        }
        if options.program.is_empty() {
            return Err(SessionError::InvalidOptions {
                message: "program must not be empty".to_string(),
            });
        }

        let is_reviewer = options.agent_type == AgentType::Reviewer;
        Ok(Self {
            title: options.title,
            path: options.path,
            program: options.program,
            plan_file: options.plan_file,
            wave_number: options.wave_number,
            task_number: options.task_number,
            peers: options.peers,
            agent_type: options.agent_type,
            is_reviewer,
            branch: None,
            status: InstanceStatus::Loading,
            prompt_detected: false,
            cached_pane_content: Vec::new(),
            queued_prompt: options.queued_prompt,
            initial_prompt_transferred: false,
            worktree: None,
            tmux: None,
            factory,
            git: GitCli::default(),
        })
    }

    pub fn started(&self) -> bool {
        self.tmux.is_some()
    }

    pub fn set_status(&mut self, status: InstanceStatus) {
        self.status = status;
    }

    pub fn worktree_path(&self) -> Option<&Path> {
        self.worktree.as_ref().map(PlanWorktree::path)
    }

    /// Diff of the instance's worktree against its recorded base commit.
    /// Planner instances (no worktree) have no diff.
    pub fn diff(&self) -> Option<DiffStats> {
        self.worktree.as_ref().map(PlanWorktree::diff)
    }

    /// Environment injected into the spawned pane. `KASMOS_MANAGED` is
    /// always present; task variables only for wave members.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![("KASMOS_MANAGED".to_string(), "1".to_string())];
        if let (Some(task), Some(wave)) = (self.task_number, self.wave_number) {
            vars.push(("KASMOS_TASK".to_string(), task.to_string()));
            vars.push(("KASMOS_WAVE".to_string(), wave.to_string()));
            vars.push((
                "KASMOS_PEERS".to_string(),
                self.peers.unwrap_or(1).to_string(),
            ));
        }
        vars
    }

    /// Starts on the main branch with no worktree (planners, solo agents).
    pub fn start_on_main_branch(&mut self) -> Result<(), SessionError> {
        if self.started() {
            return Err(SessionError::AlreadyStarted {
                title: self.title.clone(),
            });
        }
        let workdir = self.path.clone();
        self.spawn_pane(&workdir)
    }

    /// Creates (or reuses) the branch worktree and starts the pane inside
    /// it (coders, reviewers).
    pub fn start_on_branch(&mut self, branch: &str) -> Result<(), SessionError> {
        if self.started() {
            return Err(SessionError::AlreadyStarted {
                title: self.title.clone(),
            });
        }

        let repo = discover_repo(&self.path, &self.git)?;
        let mut worktree = PlanWorktree::new(self.git.clone(), &repo, branch);
        worktree.setup()?;

        let workdir = worktree.path().to_path_buf();
        self.branch = Some(branch.to_string());
        self.worktree = Some(worktree);

        if let Err(err) = self.spawn_pane(&workdir) {
            if let Some(worktree) = self.worktree.take() {
                let _ = worktree.cleanup();
            }
            self.branch = None;
            return Err(err);
        }
        Ok(())
    }

    fn spawn_pane(&mut self, workdir: &Path) -> Result<(), SessionError> {
        let command = self.compose_command();
        let env = self.env_vars();
        let mut tmux = self.factory.create(&self.title, &command);
        tmux.start(workdir, &env)
            .map_err(|err| SessionError::HarnessStartFailure {
                title: self.title.clone(),
                cause: err.to_string(),
            })?;
        self.tmux = Some(tmux);
        self.status = InstanceStatus::Running;
        info!(title = %self.title, agent = %self.agent_type, "instance started");
        Ok(())
    }

    /// The full pane command line. Transfers `queued_prompt` onto the CLI
    /// only when the harness supports prompt injection; otherwise the prompt
    /// stays queued for the supervisor to paste after the session settles.
    fn compose_command(&mut self) -> String {
        let harness = harness_for(&self.program);
        let initial_prompt = if supports_cli_prompt(&self.program) {
            let prompt = self.queued_prompt.take();
            if prompt.is_some() {
                self.initial_prompt_transferred = true;
            }
            prompt
        } else {
            None
        };

        let flags = harness.build_flags(&AgentConfig {
            initial_prompt,
            ..AgentConfig::default()
        });

        let mut command = self.program.clone();
        for flag in flags {
            command.push(' ');
            command.push_str(&shell_quote(&flag));
        }
        command
    }

    /// Pastes the still-queued prompt into a ready session (harnesses with
    /// no CLI-prompt channel).
    pub fn paste_queued_prompt(&mut self) -> Result<(), SessionError> {
        let Some(prompt) = self.queued_prompt.take() else {
            return Ok(());
        };
        let tmux = self.tmux.as_mut().ok_or_else(|| SessionError::NotStarted {
            title: self.title.clone(),
        })?;
        tmux.send_keys(prompt.as_bytes())?;
        tmux.send_keys(b"\r")?;
        Ok(())
    }

    pub fn tmux_alive(&self) -> bool {
        self.tmux.as_ref().map(|tmux| tmux.alive()).unwrap_or(false)
    }

    /// Captures the pane and refreshes the cached copy.
    pub fn capture_pane(&mut self) -> Result<&[u8], SessionError> {
        let tmux = self.tmux.as_ref().ok_or_else(|| SessionError::NotStarted {
            title: self.title.clone(),
        })?;
        self.cached_pane_content = tmux.capture()?;
        Ok(&self.cached_pane_content)
    }

    pub fn tmux_mut(&mut self) -> Option<&mut (dyn TmuxAdapter + 'static)> {
        self.tmux.as_deref_mut()
    }

    /// Tears down the pane and the worktree.
    pub fn kill(&mut self) -> Result<(), SessionError> {
        if let Some(mut tmux) = self.tmux.take() {
            tmux.kill()?;
        }
        if let Some(worktree) = self.worktree.take() {
            worktree.cleanup()?;
        }
        info!(title = %self.title, "instance killed");
        Ok(())
    }
}
