pub mod compose;
pub mod gmail;
pub mod message;
pub mod outlook;
pub mod provider;
pub mod query;
