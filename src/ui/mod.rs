//! User-visible texts and Discord embeds.

pub mod messages;

#[cfg(feature = "discord")]
pub mod embeds;
