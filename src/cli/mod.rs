pub mod app;
pub mod commands;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod fetch;
pub mod output;
pub mod prompts;
pub mod runtime;
pub mod score;
