//! ringleader-channel — in-process message transport for Ringleader.
//!
//! Provides the [`ChannelManager`]: lazily-created, bounded per-recipient
//! mailboxes with drop-on-full semantics, plus fire-and-forget topic
//! broadcast. All components exchange `Message` envelopes through a shared
//! manager instance rather than holding references to each other.

pub mod manager;

pub use manager::{ChannelManager, QueueStats};
