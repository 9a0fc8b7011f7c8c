use kasmos_git::GitError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to start harness for {title}: {cause}")]
    HarnessStartFailure { title: String, cause: String },
    #[error("tmux command failed ({command}): {cause}")]
    Tmux { command: String, cause: String },
    #[error("instance not started: {title}")]
    NotStarted { title: String },
    #[error("instance already started: {title}")]
    AlreadyStarted { title: String },
    #[error("invalid instance options: {message}")]
    InvalidOptions { message: String },
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("session io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
