pub mod gmail;
pub mod outlook;
