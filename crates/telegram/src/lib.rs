//! Telegram Bot API transport - thin I/O wrappers
//!
//! - `api` - `sendMessage`/`sendSticker`/`getUpdates` over HTTPS and the
//!   `ChatSender` seam the pipeline mocks in tests
//! - `update` - inbound update types and command classification
//! - `poller` - long-poll loop with offset tracking and error backoff
//!
//! Delivery and ack semantics are Telegram's problem; everything here either
//! succeeds or surfaces a `TelegramError` for the caller to log.

pub mod api;
pub mod poller;
pub mod update;

pub use api::{BotApi, ChatSender, TelegramError};
pub use poller::{UpdateHandler, UpdatePoller};
pub use update::{InboundKind, InboundMessage, Update};
