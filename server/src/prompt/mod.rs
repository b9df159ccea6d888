pub mod chat;
pub mod llm_config;

pub use chat::{ChatModel, DynLanguageModel, Judgement, LanguageModel, ModelError};
