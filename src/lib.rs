//! Analysis Jobs — job scheduling and workflow dispatch service.

pub mod api;
pub mod config;
pub mod error;
pub mod flow;
pub mod handlers;
pub mod scheduler;
pub mod store;
