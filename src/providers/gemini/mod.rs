mod client;
pub mod types;

pub use client::{GeminiClient, build_payload};
pub use types::{GenerateContentRequest, GenerationConfig};
