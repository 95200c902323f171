//! # Bot Module
//!
//! Guild lifecycle and the Discord adapter.
//!
//! [`registry::PlayerRegistry`] is the only place guild players are built
//! and torn down. With the `discord` feature, [`handler::AirplayBot`] drives
//! it from gateway events and [`voice::DiscordVoiceSession`] implements the
//! voice session on top of serenity and songbird.

pub mod registry;

#[cfg(feature = "discord")]
pub mod dca;
#[cfg(feature = "discord")]
pub mod handler;
#[cfg(feature = "discord")]
pub mod voice;

pub use registry::{PlayerRegistry, SessionFactory};

#[cfg(feature = "discord")]
pub use handler::AirplayBot;
#[cfg(feature = "discord")]
pub use voice::{DiscordSessions, DiscordVoiceSession};
