//! Terminal-multiplexer capability and its tmux subprocess implementation.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::SessionError;

/// Capability for hosting an agent process in a multiplexer pane. The pane
/// is owned exclusively by its instance; nothing else may send keys to it.
pub trait TmuxAdapter: Send {
    fn start(&mut self, workdir: &Path, env: &[(String, String)]) -> Result<(), SessionError>;
    fn send_keys(&mut self, bytes: &[u8]) -> Result<(), SessionError>;
    fn capture(&self) -> Result<Vec<u8>, SessionError>;
    fn alive(&self) -> bool;
    fn kill(&mut self) -> Result<(), SessionError>;
}

/// Creates adapters bound to a session name and the full command line the
/// pane will run. The command is composed by the instance (program, flags,
/// and the initial prompt when the harness accepts one on the CLI).
pub trait TmuxFactory: Send {
    fn create(&self, session_name: &str, command: &str) -> Box<dyn TmuxAdapter>;
}

const RIGHT_ARROW: &[u8] = b"\x1b[C";
const ENTER: &[u8] = b"\r";

/// Answer to a harness permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionResponse {
    AllowAlways,
    AllowOnce,
    Reject,
}

impl PermissionResponse {
    /// Key sequence driving the harness's permission menu.
    fn key_sequences(&self) -> &'static [&'static [u8]] {
        match self {
            Self::AllowAlways => &[RIGHT_ARROW, ENTER, ENTER],
            Self::AllowOnce => &[ENTER],
            Self::Reject => &[RIGHT_ARROW, RIGHT_ARROW, ENTER],
        }
    }
}

/// Drives a permission prompt shown in the pane to the chosen answer.
pub fn send_permission_response(
    tmux: &mut dyn TmuxAdapter,
    response: PermissionResponse,
) -> Result<(), SessionError> {
    for sequence in response.key_sequences() {
        tmux.send_keys(sequence)?;
    }
    Ok(())
}

/// Real adapter shelling out to the `tmux` binary.
pub struct TmuxCli {
    binary: PathBuf,
    session_name: String,
    command: String,
}

impl TmuxCli {
    pub fn new(session_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            binary: PathBuf::from("tmux"),
            session_name: session_name.into(),
            command: command.into(),
        }
    }

    fn run(&self, args: &[String]) -> Result<Vec<u8>, SessionError> {
        let rendered = format!("{} {}", self.binary.display(), args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|err| SessionError::Tmux {
                command: rendered.clone(),
                cause: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(SessionError::Tmux {
                command: rendered,
                cause: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

impl TmuxAdapter for TmuxCli {
    fn start(&mut self, workdir: &Path, env: &[(String, String)]) -> Result<(), SessionError> {
        if self.alive() {
            return Err(SessionError::Tmux {
                command: format!("tmux new-session -s {}", self.session_name),
                cause: "session already exists".to_string(),
            });
        }

        let mut args = vec![
            "new-session".to_string(),
            "-d".to_string(),
            "-s".to_string(),
            self.session_name.clone(),
            "-c".to_string(),
            workdir.display().to_string(),
        ];
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.command.clone());

        self.run(&args)?;
        Ok(())
    }

    fn send_keys(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let args = vec![
            "send-keys".to_string(),
            "-t".to_string(),
            self.session_name.clone(),
            "-l".to_string(),
            String::from_utf8_lossy(bytes).into_owned(),
        ];
        self.run(&args)?;
        Ok(())
    }

    fn capture(&self) -> Result<Vec<u8>, SessionError> {
        self.run(&[
            "capture-pane".to_string(),
            "-p".to_string(),
            "-t".to_string(),
            self.session_name.clone(),
        ])
    }

    fn alive(&self) -> bool {
        Command::new(&self.binary)
            .args(["has-session", "-t", &self.session_name])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn kill(&mut self) -> Result<(), SessionError> {
        if !self.alive() {
            return Ok(());
        }
        self.run(&[
            "kill-session".to_string(),
            "-t".to_string(),
            self.session_name.clone(),
        ])?;
        Ok(())
    }
}

/// Factory producing real tmux-backed adapters.
#[derive(Debug, Clone, Default)]
pub struct TmuxCliFactory;

impl TmuxFactory for TmuxCliFactory {
    fn create(&self, session_name: &str, command: &str) -> Box<dyn TmuxAdapter> {
        Box::new(TmuxCli::new(session_name, command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTmux;

    #[test]
    fn allow_always_sends_right_enter_enter() {
        let (mut tmux, state) = MockTmux::new();
        send_permission_response(&mut tmux, PermissionResponse::AllowAlways)
            .expect("send response");

        let sent = state.lock().expect("mock state").sent_keys.clone();
        assert_eq!(sent, vec![b"\x1b[C".to_vec(), b"\r".to_vec(), b"\r".to_vec()]);
    }

    #[test]
    fn allow_once_sends_single_enter() {
        let (mut tmux, state) = MockTmux::new();
        send_permission_response(&mut tmux, PermissionResponse::AllowOnce).expect("send response");

        let sent = state.lock().expect("mock state").sent_keys.clone();
        assert_eq!(sent, vec![b"\r".to_vec()]);
    }

    #[test]
    fn reject_sends_right_right_enter() {
        let (mut tmux, state) = MockTmux::new();
        send_permission_response(&mut tmux, PermissionResponse::Reject).expect("send response");

        let sent = state.lock().expect("mock state").sent_keys.clone();
        assert_eq!(
            sent,
            vec![b"\x1b[C".to_vec(), b"\x1b[C".to_vec(), b"\r".to_vec()]
        );
    }
}
