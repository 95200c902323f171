use std::time::Duration;

use crate::audio::{player::PlayerError, queue::PlayedSong, queue::Song, session::PlayMessage};

pub const PLAYLIST_EMPTY: &str = "🫙 Playlist is empty";
pub const INVALID_POSITION: &str = "🤷🏽 Invalid position";
pub const NOTHING_PLAYING: &str = "🔇 No song is being played right now...";
pub const SERVER_ERROR: &str = "😨 Airplay has some problems... please try again";
pub const STOPPED: &str = "⏹️ Stopped playing";
pub const SKIPPED: &str = "⏭️ Skipped song";

/// Discord caps message content; the listing stops short of it.
pub const MAX_LISTING_CHARS: usize = 4000;

const PROGRESS_BAR_SEGMENTS: usize = 20;

/// Numbered playlist listing, cut with `...` once it would grow past
/// [`MAX_LISTING_CHARS`].
pub fn playlist(names: &[String]) -> String {
    if names.is_empty() {
        return PLAYLIST_EMPTY.to_string();
    }

    let mut listing = String::new();
    for (idx, name) in names.iter().enumerate() {
        let line = format!("{}. {}\n", idx + 1, name);
        if listing.len() + line.len() > MAX_LISTING_CHARS {
            listing.push_str("...");
            break;
        }
        listing.push_str(&line);
    }

    listing.trim().to_string()
}

pub fn removed(song: &Song) -> String {
    format!("🗑️ Removed song **{}** from playlist", song.human_name())
}

/// Reply for a remove request. Bad positions are a normal answer, anything
/// else is reported as a generic failure.
pub fn remove_result(result: &Result<Song, PlayerError>) -> String {
    match result {
        Ok(song) => removed(song),
        Err(err) if err.is_invalid_position() => INVALID_POSITION.to_string(),
        Err(_) => SERVER_ERROR.to_string(),
    }
}

pub fn now_playing(played: Option<&PlayedSong>) -> String {
    match played {
        Some(played) => format!("🎶 {}", played.song.human_name()),
        None => NOTHING_PLAYING.to_string(),
    }
}

/// `▬▬🔘▬▬` style bar for a progress in `[0, 1]`.
pub fn progress_bar(progress: f64, length: usize) -> String {
    let progress = if progress.is_finite() { progress.clamp(0.0, 1.0) } else { 0.0 };
    let played = (progress * length as f64) as usize;

    let mut bar = "▬".repeat(played);
    bar.push('🔘');
    bar.push_str(&"▬".repeat(length - played));
    bar
}

/// Progress line of a now playing message: bar plus `elapsed / total`.
pub fn play_progress(message: &PlayMessage) -> String {
    let elapsed = message.elapsed();
    let total = message.song.duration;

    let progress = if total.is_zero() {
        0.0
    } else {
        elapsed.as_secs_f64() / total.as_secs_f64()
    };

    format!(
        "{}\n{} / {}",
        progress_bar(progress, PROGRESS_BAR_SEGMENTS),
        format_duration(elapsed),
        format_duration(total)
    )
}

/// `m:ss`, or `h:mm:ss` from one hour on.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
