//! Error types for the sandbox module.

/// Errors produced by the sandbox layer.
///
/// A command that runs and fails is not an error: it is an [`ExecOutput`]
/// with a non-zero exit code. These variants cover the sandbox itself
/// misbehaving.
///
/// [`ExecOutput`]: super::ExecOutput
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to create sandbox from {image}: {reason}")]
    CreateFailed { image: String, reason: String },

    #[error("command could not be executed: {reason}")]
    ExecFailed { reason: String },

    #[error("failed to destroy sandbox {id}: {reason}")]
    DestroyFailed { id: String, reason: String },

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_failed_names_image() {
        let err = SandboxError::CreateFailed {
            image: "python:3.11".into(),
            reason: "pull access denied".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("python:3.11"));
        assert!(msg.contains("pull access denied"));
    }
}
