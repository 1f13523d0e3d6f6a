//! Core domain + application logic for lifebot.
//!
//! Transport-agnostic: Telegram lives behind `MessagingPort` in the adapter
//! crate, so the auth/dispatch pipeline and the scheduler are testable here.

pub mod audit;
pub mod auth;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod health;
pub mod jobs;
pub mod journal;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod scheduler;
pub mod secrets;

pub use errors::{Error, Result};
