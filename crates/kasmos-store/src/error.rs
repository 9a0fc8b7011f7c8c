#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },
    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },
    #[error("plan store unreachable: {cause}")]
    Unreachable { cause: String },
    #[error("invalid plan filename: {filename}")]
    InvalidFilename { filename: String },
    #[error("plan store io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("plan store serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("plan store: {message} (status {status})")]
    Server { status: u16, message: String },
    #[error("plan store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn plan_not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "plan",
            key: key.into(),
        }
    }

    pub fn plan_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: "plan",
            key: key.into(),
        }
    }

    pub fn topic_not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "topic",
            key: key.into(),
        }
    }

    pub fn topic_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: "topic",
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::StoreError;

    #[test]
    fn not_found_message_names_kind_and_key() {
        let err = StoreError::plan_not_found("2026-02-21-auth.md");
        assert_eq!(err.to_string(), "plan not found: 2026-02-21-auth.md");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
    }

    #[test]
    fn already_exists_message_names_kind_and_key() {
        let err = StoreError::topic_exists("infra");
        assert_eq!(err.to_string(), "topic already exists: infra");
        assert!(err.is_conflict());
    }
}
