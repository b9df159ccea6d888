pub mod account;
pub mod app_router;
pub mod assistant;
pub mod rules;
pub mod webhooks;

pub use app_router::AppRouter;
