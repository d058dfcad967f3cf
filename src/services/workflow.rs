use crate::core::config::Config;
use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::state::{ChatMessage, Step, WorkflowState};
use crate::services::checkpoint::{CheckpointStore, Resumption};
use crate::services::documents::{Category, DocumentStore};
use crate::services::llm::{ChatOptions, LlmClient};
use crate::services::operator::{Decision, Operator};
use crate::services::prompt::PromptComposer;
use anyhow::anyhow;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CHECKPOINT_PROMPT: &str = "输入 y 继续下一批，quit 退出，或直接输入修改意见：";

/// Drives `compose → generate → checkpoint` for one session, persisting the
/// state and the next step after every step.
pub struct WorkflowEngine {
    session: String,
    batch_size: u32,
    options: ChatOptions,
    composer: PromptComposer,
    llm: Box<dyn LlmClient>,
    documents: Arc<dyn DocumentStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    operator: Box<dyn Operator>,
}

impl WorkflowEngine {
    pub fn new(
        config: &Config,
        llm: Box<dyn LlmClient>,
        documents: Arc<dyn DocumentStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        operator: Box<dyn Operator>,
    ) -> Self {
        Self {
            session: config.session.clone(),
            batch_size: config.workflow.batch_size,
            options: ChatOptions::from_config(config),
            composer: PromptComposer::new(config.workflow.clone()),
            llm,
            documents,
            checkpoints,
            operator,
        }
    }

    /// Entry step and state for a resumption decision.
    ///
    /// `seed` becomes the user input of a new cycle; it cannot redirect a
    /// cycle that was interrupted half way.
    pub fn entry_point(resumption: Resumption, seed: Option<String>) -> (Step, WorkflowState) {
        match resumption {
            Resumption::FreshStart => (
                Step::Compose,
                WorkflowState { user_input: seed, ..WorkflowState::default() },
            ),
            Resumption::ResumeAtStep(step, state) => {
                if seed.is_some() {
                    warn!("Resuming mid-cycle at {} step; ignoring the new prompt", step);
                }
                (step, state)
            }
            Resumption::ResumeFromCheckpointBoundary(mut state) => {
                state.first_time = true;
                state.user_input = seed;
                (Step::Compose, state)
            }
        }
    }

    pub async fn resume_point(&self, seed: Option<String>) -> WorkflowResult<(Step, WorkflowState)> {
        let saved = self
            .checkpoints
            .get(&self.session)
            .await
            .map_err(|e| WorkflowError::checkpoint_store(Step::Compose, e))?;
        let resumption = Resumption::decide(saved);
        match &resumption {
            Resumption::FreshStart => info!("Session '{}': starting fresh", self.session),
            Resumption::ResumeAtStep(step, state) => info!(
                "Session '{}': resuming at {} step (unit {})",
                self.session, step, state.progress_counter
            ),
            Resumption::ResumeFromCheckpointBoundary(state) => info!(
                "Session '{}': starting a new cycle at unit {}",
                self.session, state.progress_counter
            ),
        }
        Ok(Self::entry_point(resumption, seed))
    }

    /// Runs until the operator quits. Returns the final persisted state.
    pub async fn run(&mut self, seed: Option<String>) -> WorkflowResult<WorkflowState> {
        let (mut step, mut state) = self.resume_point(seed).await?;

        // Resumed between generate and the decision: show the pending draft again.
        if step == Step::Checkpoint {
            match state.last_output.as_deref() {
                Some(draft) => self.operator.notify(draft),
                None => warn!("Resuming at checkpoint without a generated draft"),
            }
        }

        loop {
            let started = Instant::now();
            let (next, new_state) = self.execute(step, state).await?;
            info!("[{}] took {:.3}s", step, started.elapsed().as_secs_f64());

            self.checkpoints
                .put(&self.session, &new_state, next)
                .await
                .map_err(|e| WorkflowError::checkpoint_store(step, e))?;
            debug!("Checkpoint saved, next step: {:?}", next);

            state = new_state;
            match next {
                Some(next_step) => step = next_step,
                None => return Ok(state),
            }
        }
    }

    async fn execute(
        &mut self,
        step: Step,
        state: WorkflowState,
    ) -> WorkflowResult<(Option<Step>, WorkflowState)> {
        match step {
            Step::Compose => {
                let state = self.composer.compose(state, self.documents.as_ref()).await?;
                Ok((Some(Step::Generate), state))
            }
            Step::Generate => Ok((Some(Step::Checkpoint), self.generate(state).await?)),
            Step::Checkpoint => {
                let decision = self
                    .operator
                    .decide(CHECKPOINT_PROMPT)
                    .map_err(|source| WorkflowError::Interrupted { step, source })?;
                info!("Operator decision: {:?}", decision);
                let next = transition(&decision);
                Ok((next, apply_decision(state, decision, self.batch_size)?))
            }
        }
    }

    /// Calls the model, stores the artifact, then records the output in state.
    /// Nothing in `state` changes unless both succeed.
    pub async fn generate(&mut self, mut state: WorkflowState) -> WorkflowResult<WorkflowState> {
        let messages: &[ChatMessage] = state.message_history.as_deref().ok_or_else(|| {
            WorkflowError::configuration_at(Step::Generate, "message history missing before generation")
        })?;

        let label = state.range_label(self.batch_size);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .map_err(|e| WorkflowError::Generation { source: e.into() })?,
        );
        spinner.set_message(format!("Generating outline {}...", label));
        spinner.enable_steady_tick(Duration::from_millis(120));

        let result = self.llm.chat(messages, &self.options).await;
        spinner.finish_and_clear();

        let text = result.map_err(|source| WorkflowError::Generation { source })?;
        if text.trim().is_empty() {
            return Err(WorkflowError::Generation {
                source: anyhow!("model returned an empty completion"),
            });
        }

        let location = self
            .documents
            .write_text(Category::Outline, &label, &text)
            .await
            .map_err(|e| WorkflowError::document_store(Step::Generate, e))?;

        self.operator.notify(&text);
        self.operator.notify(&format!("大纲已保存: {}", location));

        state.last_output = Some(text);
        state.first_time = false;
        Ok(state)
    }
}

pub fn transition(decision: &Decision) -> Option<Step> {
    match decision {
        Decision::Advance | Decision::Retry(_) => Some(Step::Compose),
        Decision::Quit => None,
    }
}

pub fn apply_decision(
    mut state: WorkflowState,
    decision: Decision,
    batch_size: u32,
) -> WorkflowResult<WorkflowState> {
    match decision {
        Decision::Advance => {
            state.progress_counter =
                state.progress_counter.checked_add(batch_size).ok_or_else(|| {
                    WorkflowError::configuration_at(
                        Step::Checkpoint,
                        format!("progress counter overflows past unit {}", state.progress_counter),
                    )
                })?;
            state.first_time = true;
            state.user_input = None;
        }
        Decision::Retry(feedback) => {
            if let (Some(history), Some(output)) =
                (state.message_history.as_mut(), state.last_output.as_ref())
            {
                history.push(ChatMessage::assistant(output.clone()));
            }
            state.user_input = Some(feedback);
        }
        Decision::Quit => {}
    }
    Ok(state)
}
