/// Errors surfaced by the shell.
///
/// Only handle-creation failures cross the public open/close API. Cosmetic
/// failures are logged and dropped at the call site, and missing resources
/// are reported to the scheme interceptor as a status code, not as an error.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("Failed to create native window: {message}")]
    HandleCreation { message: String },

    #[error("Failed to create renderer: {message}")]
    RendererCreation { message: String },

    #[error("Cosmetic styling failed: {message}")]
    Cosmetic { message: String },

    #[error("Invalid URI: {uri}")]
    InvalidUri { uri: String },

    #[error("Dialog rejected: another dialog is already active")]
    DialogBusy,

    #[error("Shell stopped before the operation completed")]
    ShellStopped,

    #[error("Renderer already disposed")]
    Disposed,

    #[error("Backend call failed: {message}")]
    Backend { message: String },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl ShellError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ShellError::HandleCreation { .. } => "HANDLE_CREATION_FAILED",
            ShellError::RendererCreation { .. } => "RENDERER_CREATION_FAILED",
            ShellError::Cosmetic { .. } => "COSMETIC_FAILED",
            ShellError::InvalidUri { .. } => "INVALID_URI",
            ShellError::DialogBusy => "DIALOG_BUSY",
            ShellError::ShellStopped => "SHELL_STOPPED",
            ShellError::Disposed => "RENDERER_DISPOSED",
            ShellError::Backend { .. } => "BACKEND_FAILED",
            ShellError::Io { .. } => "SHELL_IO_ERROR",
            ShellError::Json { .. } => "SHELL_JSON_ERROR",
        }
    }

    /// Cosmetic failures never block window usability.
    pub fn is_cosmetic(&self) -> bool {
        matches!(self, ShellError::Cosmetic { .. })
    }

    /// Failures that abort a single open operation.
    pub fn is_creation_failure(&self) -> bool {
        matches!(
            self,
            ShellError::HandleCreation { .. } | ShellError::RendererCreation { .. }
        )
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        ShellError::Backend {
            message: message.into(),
        }
    }
}
