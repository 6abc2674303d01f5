//! REST collaborators: history fetch and attachment upload

pub mod client;
pub mod history;
pub mod upload;

pub use client::ApiClient;
