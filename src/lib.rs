pub mod api;
pub mod auth;
pub mod models;
pub mod store;
pub mod workflow;
