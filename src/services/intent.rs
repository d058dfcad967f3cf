//! Two-branch question/chat router. Unlike the outline workflow, a failed
//! model call here falls back to keyword rules instead of aborting.

use crate::core::state::ChatMessage;
use crate::services::llm::{ChatOptions, LlmClient};
use log::warn;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Question,
    Chat,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Question => f.write_str("question"),
            Intent::Chat => f.write_str("chat"),
        }
    }
}

impl Intent {
    pub fn from_rules(text: &str) -> Self {
        const MARKERS: [&str; 4] = ["?", "？", "怎么", "如何"];
        if MARKERS.iter().any(|m| text.contains(m)) {
            Intent::Question
        } else {
            Intent::Chat
        }
    }

    fn from_reply(reply: &str) -> Option<Self> {
        let word = reply
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        match word.as_str() {
            "question" => Some(Intent::Question),
            "chat" => Some(Intent::Chat),
            _ => None,
        }
    }

    pub fn respond(&self) -> &'static str {
        match self {
            Intent::Question => "我判断这是一个【问题】，后续可以进入正式问答流程。",
            Intent::Chat => "我判断这是【聊天】，可以轻松一点回复。",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub intent: Intent,
    /// True when the model could not be used and keyword rules decided.
    pub fallback: bool,
}

pub struct IntentRouter<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> IntentRouter<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, text: &str) -> Classification {
        let messages = [
            ChatMessage::system(
                "判断用户输入是提问还是闲聊。只回答一个英文单词：question 或 chat。",
            ),
            ChatMessage::user(text),
        ];
        let options = ChatOptions { temperature: 0.0, max_tokens: 8 };

        match self.llm.chat(&messages, &options).await {
            Ok(reply) => match Intent::from_reply(&reply) {
                Some(intent) => Classification { intent, fallback: false },
                None => {
                    warn!("Unrecognised intent reply {:?}, using keyword rules", reply);
                    Classification { intent: Intent::from_rules(text), fallback: true }
                }
            },
            Err(e) => {
                warn!("Intent classification failed, using keyword rules: {:#}", e);
                Classification { intent: Intent::from_rules(text), fallback: true }
            }
        }
    }
}
