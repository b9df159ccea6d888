pub mod tools;

pub use tools::{tool_definitions, AssistantTools, ToolDefinition};
