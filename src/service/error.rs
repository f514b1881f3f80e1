use crate::framework::FrameworkError;
use crate::registry::RegistryError;
use crate::service::Stage;

/// Error raised by a component's own hook.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum HookError {
    /// Malformed configuration. Re-returned by `configure`.
    #[error("Bad configuration: {0}")]
    BadConfig(String),
    /// Early exit requested by the component; the graph stays up and is cleaned up normally.
    #[error("Exit requested: {0}")]
    Exit(String),
    #[error("{0}")]
    Failed(String),
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        HookError::Failed(message)
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        HookError::Failed(message.to_string())
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ServiceError {
    #[error("Error while {stage} service '{uid}' ({classname}): {source}")]
    Hook {
        uid: String,
        classname: String,
        stage: Stage,
        source: HookError,
    },
    #[error(transparent)]
    Framework(#[from] FrameworkError),
    #[error("Service '{uid}' has no output key '{key}'")]
    UnknownKey { uid: String, key: String },
    #[error("Output '{key}' of '{uid}' is bound to '{expected}', got object '{found}'")]
    OutputMismatch {
        uid: String,
        key: String,
        expected: String,
        found: String,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ServiceError {
    /// True when a component asked the application to exit.
    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            ServiceError::Hook {
                source: HookError::Exit(_),
                ..
            }
        )
    }

    pub fn hook_error(&self) -> Option<&HookError> {
        match self {
            ServiceError::Hook { source, .. } => Some(source),
            _ => None,
        }
    }
}
