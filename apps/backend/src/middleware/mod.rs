//! Request middleware for the streaming-catalog adapter.

pub mod auth;

pub use auth::shared_secret_middleware;
