//! Espejo Digital: a reflective companion backed by Gemini.
//!
//! The core is [`dispatch::Dispatcher`], which walks models, shuffled keys
//! and API versions until one route answers. Around it sit the conversation
//! store, the agent registry, a terminal front end and an HTTP proxy.

pub mod agents;
pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod display;
pub mod input;
pub mod providers;
pub mod server;
pub mod session;
pub mod store;
pub mod utils;

pub use crate::core::error::{DispatchError, EspejoError};
