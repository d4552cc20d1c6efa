use super::provider::ProviderError;
use super::task::GenerationTask;

/// Failure of a single generation request.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("no active model configured for {task}")]
    NoActiveModel { task: GenerationTask },

    #[error("no active prompt template for {task}")]
    NoActiveTemplate { task: GenerationTask },

    #[error("no API key stored for credential {credential_ref:?}")]
    MissingCredential { credential_ref: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("model response contained no parseable JSON: {detail}")]
    MalformedResponse { detail: String },

    #[error("batch response has no {expected:?} array")]
    InvalidBatchShape { expected: &'static str },

    #[error("provider call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// True for failures fixed by changing the model/template/credential
    /// configuration rather than retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoActiveModel { .. } | Self::NoActiveTemplate { .. } | Self::MissingCredential { .. }
        )
    }

    /// Message safe to show an end user; details stay in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoActiveModel { .. }
            | Self::NoActiveTemplate { .. }
            | Self::MissingCredential { .. } => "generation unavailable, check configuration",
            Self::Provider(_)
            | Self::MalformedResponse { .. }
            | Self::InvalidBatchShape { .. }
            | Self::Timeout { .. } => "generation failed, verify credentials",
            Self::Cancelled => "generation cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_hide_details() {
        let err = GenerationError::MalformedResponse {
            detail: "expected value at line 1 column 1".into(),
        };
        assert_eq!(err.user_message(), "generation failed, verify credentials");
        assert!(!err.is_configuration());

        let err = GenerationError::NoActiveModel {
            task: GenerationTask::ExecutionGeneration,
        };
        assert_eq!(err.user_message(), "generation unavailable, check configuration");
        assert!(err.is_configuration());
    }
}
