//! Flat-file persistence for leadbot.
//!
//! Two whole-document JSON stores, one file set per bot:
//! - `dialog` - append-only question/answer log per (bot, user)
//! - `rate` - one rolling daily message counter per bot
//!
//! There is no schema migration: an unexpected shape on read is treated as
//! empty or surfaced as `StoreError`, never patched in place.

pub mod dialog;
pub mod rate;

pub use dialog::{DialogEntry, DialogStore, RecentTurn, StoreError};
pub use rate::RateLimiter;
