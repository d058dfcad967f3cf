//! Builds the message sequence sent to the language model for one cycle.

use crate::core::config::WorkflowConfig;
use crate::core::error::{WorkflowError, WorkflowResult};
use crate::core::state::{ChatMessage, Step, WorkflowState};
use crate::services::documents::{Category, DocumentStore};

pub const CONTEXT_SEPARATOR: &str = "\n\n-----\n\n";
const EMPTY_SECTION: &str = "（暂无）";

pub struct PromptComposer {
    config: WorkflowConfig,
}

impl PromptComposer {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn system_prompt(&self, start: u32, end: u32) -> String {
        format!(
            "你是一位资深的网络小说大纲策划。\
            \n请根据提供的世界观设定与已有大纲，续写第{start}章至第{end}章的章节大纲，共{batch}章。\
            \n\n要求 (Requirements):\
            \n1. 每章给出章节标题与主要情节，情节需与已有大纲和世界观保持一致。\
            \n2. 每章的情节要有推进，避免重复已有大纲中的事件。\
            \n3. 总字数不少于{min_chars}字。\
            \n4. 仅输出大纲正文，按「第N章 标题」逐章排列，不要输出额外说明。",
            start = start,
            end = end,
            batch = self.config.batch_size,
            min_chars = self.config.min_chars(),
        )
    }

    /// Updates `message_history` for the next generation.
    ///
    /// On a fresh cycle the history is rebuilt from the document store as
    /// `[system, context, user]`; otherwise the pending `user_input` is
    /// appended as one user message.
    pub async fn compose(
        &self,
        mut state: WorkflowState,
        documents: &dyn DocumentStore,
    ) -> WorkflowResult<WorkflowState> {
        let rebuild = state.first_time || state.message_history.is_none();

        if rebuild {
            let (start, end) = state.unit_range(self.config.batch_size);
            let request = match state.user_input.as_deref().map(str::trim) {
                Some(input) if !input.is_empty() => input.to_string(),
                _ if state.has_progressed() => continuation_request(start, end),
                _ => {
                    return Err(WorkflowError::configuration_at(
                        Step::Compose,
                        "no seed prompt given for a new session",
                    ))
                }
            };

            let world = documents
                .list_texts(Category::WorldGuide)
                .await
                .map_err(|e| WorkflowError::document_store(Step::Compose, e))?;
            let outlines = documents
                .list_texts(Category::Outline)
                .await
                .map_err(|e| WorkflowError::document_store(Step::Compose, e))?;

            state.message_history = Some(vec![
                ChatMessage::system(self.system_prompt(start, end)),
                ChatMessage::user(context_message(&world, &outlines)),
                ChatMessage::user(request),
            ]);
        } else {
            let input = state
                .user_input
                .clone()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    WorkflowError::configuration_at(
                        Step::Compose,
                        "no feedback to continue the conversation",
                    )
                })?;
            if let Some(history) = state.message_history.as_mut() {
                history.push(ChatMessage::user(input));
            }
        }

        Ok(state)
    }
}

fn section(title: &str, blobs: &[String]) -> String {
    let body = if blobs.is_empty() {
        EMPTY_SECTION.to_string()
    } else {
        blobs.join(CONTEXT_SEPARATOR)
    };
    format!("【{}】\n{}", title, body)
}

pub fn context_message(world: &[String], outlines: &[String]) -> String {
    format!("{}\n\n{}", section("世界观设定", world), section("已有大纲", outlines))
}

pub fn continuation_request(start: u32, end: u32) -> String {
    format!("请接着已有大纲，继续写第{}章至第{}章的大纲。", start, end)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::state::Role;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory document store recording every artifact write.
    #[derive(Default)]
    pub(crate) struct MemoryDocuments {
        pub world: Vec<String>,
        pub outlines: Mutex<Vec<(String, String)>>,
        pub fail: bool,
        pub fail_writes: bool,
    }

    #[async_trait]
    impl DocumentStore for MemoryDocuments {
        async fn list_texts(&self, category: Category) -> Result<Vec<String>> {
            if self.fail {
                return Err(anyhow!("disk unreachable"));
            }
            Ok(match category {
                Category::WorldGuide => self.world.clone(),
                Category::Outline => {
                    let mut outlines = self.outlines.lock().unwrap().clone();
                    outlines.sort();
                    outlines.into_iter().map(|(_, text)| text).collect()
                }
            })
        }

        async fn write_text(&self, category: Category, range_label: &str, text: &str) -> Result<String> {
            if self.fail || self.fail_writes {
                return Err(anyhow!("disk unreachable"));
            }
            let name = format!("{}_{}.txt", category.prefix(), range_label);
            self.outlines.lock().unwrap().push((name.clone(), text.to_string()));
            Ok(name)
        }
    }

    fn composer() -> PromptComposer {
        PromptComposer::new(WorkflowConfig::default())
    }

    #[test]
    fn test_system_prompt_carries_tunables() {
        let prompt = composer().system_prompt(11, 20);
        assert!(prompt.contains("第11章至第20章"));
        assert!(prompt.contains("共10章"));
        assert!(prompt.contains("不少于1500字"));
    }

    #[tokio::test]
    async fn test_fresh_session_builds_three_messages() -> Result<()> {
        let docs = MemoryDocuments::default();
        let state = WorkflowState {
            user_input: Some("帮我写开头".to_string()),
            ..WorkflowState::default()
        };

        let state = composer().compose(state, &docs).await?;
        let history = state.message_history.unwrap();

        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[1].role, Role::User);
        assert!(history[1].content.contains(EMPTY_SECTION));
        assert_eq!(history[2], ChatMessage::user("帮我写开头"));
        // first_time is only cleared after generation
        assert!(state.first_time);
        Ok(())
    }

    #[tokio::test]
    async fn test_context_joins_documents_with_separator() -> Result<()> {
        let docs = MemoryDocuments {
            world: vec!["地理".to_string(), "势力".to_string()],
            ..Default::default()
        };
        docs.write_text(Category::Outline, "1-10", "第一卷").await?;

        let state = WorkflowState {
            user_input: Some("继续".to_string()),
            ..WorkflowState::default()
        };
        let state = composer().compose(state, &docs).await?;
        let context = &state.message_history.unwrap()[1].content;

        assert!(context.contains(&format!("地理{}势力", CONTEXT_SEPARATOR)));
        assert!(context.contains("第一卷"));
        assert!(context.find("世界观设定").unwrap() < context.find("已有大纲").unwrap());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_seed_on_first_cycle_is_configuration_error() {
        let docs = MemoryDocuments::default();
        let result = composer().compose(WorkflowState::default(), &docs).await;
        assert!(matches!(result, Err(WorkflowError::Configuration { step: Some(Step::Compose), .. })));
    }

    #[tokio::test]
    async fn test_later_cycle_falls_back_to_continuation() -> Result<()> {
        let docs = MemoryDocuments::default();
        let state = WorkflowState { progress_counter: 11, ..WorkflowState::default() };

        let state = composer().compose(state, &docs).await?;
        let history = state.message_history.unwrap();
        assert_eq!(history[2].content, continuation_request(11, 20));
        Ok(())
    }

    #[tokio::test]
    async fn test_follow_up_appends_exactly_one_user_message() -> Result<()> {
        let docs = MemoryDocuments::default();
        let prior = vec![
            ChatMessage::system("模板"),
            ChatMessage::user("上下文"),
            ChatMessage::user("帮我写开头"),
            ChatMessage::assistant("第一章"),
        ];
        let state = WorkflowState {
            user_input: Some("再写详细一点".to_string()),
            first_time: false,
            message_history: Some(prior.clone()),
            last_output: Some("第一章".to_string()),
            progress_counter: 1,
        };

        let state = composer().compose(state, &docs).await?;
        let history = state.message_history.unwrap();
        assert_eq!(history.len(), prior.len() + 1);
        assert_eq!(&history[..prior.len()], &prior[..]);
        assert_eq!(history.last().unwrap(), &ChatMessage::user("再写详细一点"));
        Ok(())
    }

    #[tokio::test]
    async fn test_document_store_failure_is_store_unavailable() {
        let docs = MemoryDocuments { fail: true, ..Default::default() };
        let state = WorkflowState {
            user_input: Some("帮我写开头".to_string()),
            ..WorkflowState::default()
        };
        let result = composer().compose(state, &docs).await;
        assert!(matches!(
            result,
            Err(WorkflowError::StoreUnavailable { step: Step::Compose, .. })
        ));
    }
}
