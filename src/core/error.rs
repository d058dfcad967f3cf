use crate::core::state::Step;
use thiserror::Error;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Required input or tunable missing, e.g. no seed prompt on the first run.
    /// `step` is `None` when the config file itself is at fault.
    #[error("configuration error: {message}")]
    Configuration { step: Option<Step>, message: String },

    /// The language model failed during the generate step.
    #[error("generation failed: {source:#}")]
    Generation {
        #[source]
        source: anyhow::Error,
    },

    #[error("{store} unavailable during {step} step: {source:#}")]
    StoreUnavailable {
        step: Step,
        store: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("operator input failed during {step} step: {source:#}")]
    Interrupted {
        step: Step,
        #[source]
        source: anyhow::Error,
    },
}

impl WorkflowError {
    pub fn configuration(message: impl Into<String>) -> Self {
        WorkflowError::Configuration { step: None, message: message.into() }
    }

    pub fn configuration_at(step: Step, message: impl Into<String>) -> Self {
        WorkflowError::Configuration { step: Some(step), message: message.into() }
    }

    pub fn checkpoint_store(step: Step, source: anyhow::Error) -> Self {
        WorkflowError::StoreUnavailable { step, store: "checkpoint store", source }
    }

    pub fn document_store(step: Step, source: anyhow::Error) -> Self {
        WorkflowError::StoreUnavailable { step, store: "document store", source }
    }

    /// The step the error belongs to, when it is tied to one.
    pub fn step(&self) -> Option<Step> {
        match self {
            WorkflowError::Configuration { step, .. } => *step,
            WorkflowError::Generation { .. } => Some(Step::Generate),
            WorkflowError::StoreUnavailable { step, .. } => Some(*step),
            WorkflowError::Interrupted { step, .. } => Some(*step),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_error_names_failing_step() {
        let err = WorkflowError::document_store(Step::Generate, anyhow!("disk full"));
        assert_eq!(err.step(), Some(Step::Generate));
        assert_eq!(
            err.to_string(),
            "document store unavailable during generate step: disk full"
        );

        let err = WorkflowError::Generation { source: anyhow!("401 Unauthorized") };
        assert_eq!(err.step(), Some(Step::Generate));
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_configuration_error_keeps_its_step() {
        let err = WorkflowError::configuration_at(Step::Generate, "message history missing");
        assert_eq!(err.step(), Some(Step::Generate));
        assert_eq!(err.to_string(), "configuration error: message history missing");

        assert_eq!(WorkflowError::configuration("batch_size must be at least 1").step(), None);
    }
}
