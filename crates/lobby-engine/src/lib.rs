//! # lobby-engine
//!
//! Room logic for the lobby: who is connected, what they may say, and how the
//! room defends itself.
//!
//! - [`registry`]: live sessions, capacity, per-address quota
//! - [`abuse`]: per-address kick counters and temporary bans
//! - [`filter`]: pure text checks (shouting, bad words, similarity)
//! - [`automod`]: the self-tuning filter level driven by `chaos`
//! - [`history`]: bounded replay buffer
//! - [`room`]: [`ChatRoom`], which ties these together behind a [`Transport`]
//!
//! Nothing here does I/O or reads the clock on its own; every operation takes
//! `now` in epoch milliseconds.
//!
//! [`Transport`]: lobby_core::transport::Transport

pub mod abuse;
pub mod automod;
pub mod config;
pub mod filter;
pub mod history;
pub mod registry;
pub mod room;

pub use config::RoomConfig;
pub use room::{ChatRoom, DropReason, MessageOutcome, RoomStats};
