//! Core domain logic for leadbot - the conversation-to-lead pipeline
//!
//! This crate holds everything that needs no I/O:
//! - **Configuration** (`config`) - layered TOML + env loading with defaults
//! - **Session state machine** (`session`) - per (bot, user) lead-capture state
//! - **Response sanitizer** (`sanitize`) - strips non-URL bracket annotations
//! - **Phone extraction** (`phone`) - numbering-plan validation + E.164
//!
//! # Safety Principle
//!
//! The assistant is strictly an answering service. Whether a user becomes a
//! lead is decided here, by deterministic checks over the assistant's output
//! and the user's text - never by the model itself.

pub mod config;
pub mod phone;
pub mod sanitize;
pub mod session;

pub use config::{AppConfig, BotConfig, ConfigError, LimitsConfig, LoadOptions, TextsConfig};
pub use phone::{PhoneExtractor, PhoneMatch, UnknownRegionError};
pub use sanitize::ResponseSanitizer;
pub use session::{LeadState, Session, SessionKey};
