pub mod activity;
pub mod analyze;
pub mod chat;
pub mod error;
pub mod handler_utils;
pub mod server;
pub mod skills;
