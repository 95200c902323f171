//! Airplay: per-guild audio playback for a Discord music bot.

pub mod audio;
pub mod bot;
pub mod config;
pub mod sources;
pub mod storage;
pub mod ui;
