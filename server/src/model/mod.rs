pub mod digest;
pub mod email_account;
pub mod execution;
pub mod rule;
pub mod scheduled_action;
pub mod thread_tracker;
pub mod user;
