use serde::{Deserialize, Serialize};
use std::fmt;

/// Base value of `progress_counter` for a session that has not advanced yet.
pub const BASE_PROGRESS: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// The record threaded through every workflow step and persisted after each one.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WorkflowState {
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default = "default_first_time")]
    pub first_time: bool,
    #[serde(default)]
    pub message_history: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub last_output: Option<String>,
    #[serde(default = "default_progress")]
    pub progress_counter: u32,
}

fn default_first_time() -> bool {
    true
}
fn default_progress() -> u32 {
    BASE_PROGRESS
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            user_input: None,
            first_time: true,
            message_history: None,
            last_output: None,
            progress_counter: BASE_PROGRESS,
        }
    }
}

impl WorkflowState {
    pub fn has_progressed(&self) -> bool {
        self.progress_counter > BASE_PROGRESS
    }

    /// Inclusive unit range covered by the current cycle.
    pub fn unit_range(&self, batch_size: u32) -> (u32, u32) {
        let start = self.progress_counter;
        (start, start.saturating_add(batch_size.saturating_sub(1)))
    }

    pub fn range_label(&self, batch_size: u32) -> String {
        let (start, end) = self.unit_range(batch_size);
        format!("{}-{}", start, end)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Compose,
    Generate,
    Checkpoint,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Compose => "compose",
            Step::Generate => "generate",
            Step::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

/// Durable `(state, pending-next-step)` pair. `next_step == None` means the
/// last run ended through a quit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub state: WorkflowState,
    pub next_step: Option<Step>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = WorkflowState::default();
        assert!(state.first_time);
        assert_eq!(state.progress_counter, BASE_PROGRESS);
        assert!(state.message_history.is_none());
        assert!(!state.has_progressed());
    }

    #[test]
    fn test_range_label_uses_batch_size() {
        let mut state = WorkflowState::default();
        assert_eq!(state.range_label(10), "1-10");
        state.progress_counter = 11;
        assert_eq!(state.range_label(10), "11-20");
        assert_eq!(state.range_label(1), "11-11");
    }

    #[test]
    fn test_unit_range_saturates_at_max() {
        let state = WorkflowState { progress_counter: u32::MAX - 3, ..WorkflowState::default() };
        assert_eq!(state.unit_range(10), (u32::MAX - 3, u32::MAX));
    }

    #[test]
    fn test_partial_state_json_fills_defaults() {
        let json = r#"{ "user_input": "帮我写开头" }"#;
        let state: WorkflowState = serde_json::from_str(json).unwrap();
        assert_eq!(state.user_input.as_deref(), Some("帮我写开头"));
        assert!(state.first_time);
        assert_eq!(state.progress_counter, 1);
    }

    #[test]
    fn test_step_serializes_lowercase() {
        let checkpoint = Checkpoint {
            state: WorkflowState::default(),
            next_step: Some(Step::Compose),
        };
        let json = serde_json::to_string(&checkpoint).unwrap();
        assert!(json.contains(r#""next_step":"compose""#));

        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, checkpoint);
    }
}
