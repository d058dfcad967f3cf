pub mod checkpoint;
pub mod documents;
pub mod index;
pub mod intent;
pub mod llm;
pub mod operator;
pub mod prompt;
pub mod workflow;
