pub mod processor;
pub mod services;
pub mod tasks;
pub mod watch;

pub use services::Services;
