//! prism: AI image generation, vision description and chat from the terminal
//!
//! This library provides:
//! - A retrying request executor for a rate-limited inference API
//! - Explicit per-operation lifecycle tracking with observer events
//! - An image pipeline that generates, then describes, each image
//! - A chat session replaying its transcript as context
//! - A typing speed test with a local leaderboard

pub mod config;
pub mod inference;
pub mod operation;
pub mod services;
pub mod transport;
pub mod typing;

pub use config::{Config, Credentials};
pub use inference::{InferenceClient, InferenceError};
pub use services::{ChatSession, GenerationPipeline};
