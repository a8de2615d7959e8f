/// Core error type for the ticket subsystem.
///
/// Adapter crates map their platform errors into [`Error::Platform`] so the core
/// can decide between retrying, degrading a close, or reporting to the user.
/// Every variant is scoped to a single ticket; none is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing required field: {field}")]
    Validation { field: String },

    #[error("could not provision channel: {0}")]
    Provision(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("transcript unavailable: {0}")]
    TranscriptUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("platform error: {message}")]
    Platform { message: String, retryable: bool },

    #[error("config error: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn platform(message: impl Into<String>, retryable: bool) -> Self {
        Error::Platform {
            message: message.into(),
            retryable,
        }
    }

    /// Whether a lifecycle step that failed with this error may be attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Platform {
                retryable: true,
                ..
            }
        )
    }

    /// Short text suitable for an ephemeral reply to the submitter.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation { field } => format!("❌ Please fill in the **{field}** field."),
            Error::Provision(_) => {
                "❌ Could not create your ticket channel right now. Please try again later."
                    .to_string()
            }
            Error::Authorization(_) => {
                "❌ Only the ticket owner or staff can do that.".to_string()
            }
            Error::NotFound(what) => format!("❌ Not found: {what}"),
            Error::TranscriptUnavailable(_) => "❌ The transcript is unavailable.".to_string(),
            _ => "❌ Something went wrong. Please try again later.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retryable_platform_errors_are_transient() {
        assert!(Error::platform("502", true).is_transient());
        assert!(!Error::platform("403", false).is_transient());
        assert!(!Error::Provision("quota".to_string()).is_transient());
    }

    #[test]
    fn validation_message_names_the_field() {
        let e = Error::Validation {
            field: "uid".to_string(),
        };
        assert_eq!(e.to_string(), "missing required field: uid");
        assert!(e.user_message().contains("uid"));
    }
}
