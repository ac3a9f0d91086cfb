use thiserror::Error;

/// Failures the core reports to callers. None of these are fatal to a
/// daemon loop; they are logged at the call site and the loop continues.
#[derive(Debug, Error)]
pub enum LumenError {
    #[error("invalid mode '{0}' (expected idle, assist or chat)")]
    InvalidMode(String),

    #[error("invalid override key '{0}' (expected mode or mood)")]
    InvalidOverride(String),

    #[error("invalid scene name '{0}'")]
    InvalidScene(String),

    #[error("scene '{name}' could not be loaded: {reason}")]
    SceneUnavailable { name: String, reason: String },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("unsupported file type '{extension}' for {path}")]
    UnsupportedFile { path: String, extension: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("observer failed: {0}")]
    Observer(String),
}

impl LumenError {
    /// Configuration errors are caller mistakes (bad mode, unknown scene);
    /// state is left unchanged when one is returned.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LumenError::InvalidMode(_)
                | LumenError::InvalidOverride(_)
                | LumenError::InvalidScene(_)
                | LumenError::SceneUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(LumenError::InvalidMode("x".into()).is_configuration());
        assert!(LumenError::SceneUnavailable {
            name: "office".into(),
            reason: "missing".into()
        }
        .is_configuration());
        assert!(!LumenError::Persistence("disk full".into()).is_configuration());
    }

    #[test]
    fn test_messages_name_the_input() {
        let msg = LumenError::InvalidMode("sleep".into()).to_string();
        assert!(msg.contains("sleep"));
    }
}
