//! Test doubles for the tmux capability, usable by downstream crates' tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::SessionError;
use crate::tmux::{TmuxAdapter, TmuxFactory};

/// Observable state behind a [`MockTmux`]. Tests flip `alive` to simulate
/// pane exits and set `pane_content` to script captures.
#[derive(Debug, Default)]
pub struct MockTmuxState {
    pub session_name: String,
    pub command: String,
    pub started: bool,
    pub alive: bool,
    pub killed: bool,
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub sent_keys: Vec<Vec<u8>>,
    pub pane_content: Vec<u8>,
}

pub struct MockTmux {
    state: Arc<Mutex<MockTmuxState>>,
}

impl MockTmux {
    pub fn new() -> (Self, Arc<Mutex<MockTmuxState>>) {
        let state = Arc::new(Mutex::new(MockTmuxState::default()));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }

    pub fn from_state(state: Arc<Mutex<MockTmuxState>>) -> Self {
        Self { state }
    }
}

impl TmuxAdapter for MockTmux {
    fn start(&mut self, workdir: &Path, env: &[(String, String)]) -> Result<(), SessionError> {
        let mut state = self.state.lock().expect("mock tmux state");
        state.started = true;
        state.alive = true;
        state.workdir = Some(workdir.to_path_buf());
        state.env = env.to_vec();
        Ok(())
    }

    fn send_keys(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let mut state = self.state.lock().expect("mock tmux state");
        state.sent_keys.push(bytes.to_vec());
        Ok(())
    }

    fn capture(&self) -> Result<Vec<u8>, SessionError> {
        let state = self.state.lock().expect("mock tmux state");
        Ok(state.pane_content.clone())
    }

    fn alive(&self) -> bool {
        self.state.lock().expect("mock tmux state").alive
    }

    fn kill(&mut self) -> Result<(), SessionError> {
        let mut state = self.state.lock().expect("mock tmux state");
        state.alive = false;
        state.killed = true;
        Ok(())
    }
}

/// Factory handing out mock adapters while keeping every created pane's
/// state reachable for assertions.
#[derive(Clone, Default)]
pub struct MockTmuxFactory {
    pub created: Arc<Mutex<Vec<Arc<Mutex<MockTmuxState>>>>>,
    /// When set, panes start out failing `start` to simulate harness
    /// launch failures.
    pub fail_start: bool,
}

impl MockTmuxFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_state(&self) -> Option<Arc<Mutex<MockTmuxState>>> {
        self.created.lock().expect("factory state").last().cloned()
    }
}

impl TmuxFactory for MockTmuxFactory {
    fn create(&self, session_name: &str, command: &str) -> Box<dyn TmuxAdapter> {
        let state = Arc::new(Mutex::new(MockTmuxState {
            session_name: session_name.to_string(),
            command: command.to_string(),
            ..MockTmuxState::default()
        }));
        self.created
            .lock()
            .expect("factory state")
            .push(state.clone());
        if self.fail_start {
            Box::new(FailingTmux)
        } else {
            Box::new(MockTmux::from_state(state))
        }
    }
}

struct FailingTmux;

impl TmuxAdapter for FailingTmux {
    fn start(&mut self, _workdir: &Path, _env: &[(String, String)]) -> Result<(), SessionError> {
        Err(SessionError::Tmux {
            command: "tmux new-session".to_string(),
            cause: "scripted failure".to_string(),
        })
    }

    fn send_keys(&mut self, _bytes: &[u8]) -> Result<(), SessionError> {
        Ok(())
    }

    fn capture(&self) -> Result<Vec<u8>, SessionError> {
        Ok(Vec::new())
    }

    fn alive(&self) -> bool {
        false
    }

    fn kill(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}
