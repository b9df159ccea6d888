pub mod condition;
pub mod engine;
pub mod executor;
pub mod model;
pub mod resolver;
pub mod schema;
pub mod template;

pub use condition::ConditionEvaluator;
pub use engine::{ApplicationReport, ApplicationStatus, RuleEngine};
pub use executor::ActionExecutor;
pub use resolver::ActionResolver;
