use serenity::builder::{CreateEmbed, CreateEmbedFooter};

use super::messages::play_progress;
use crate::audio::session::PlayMessage;

pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
}

const STANDARD_FOOTER: &str = "🎵 Airplay";

/// Now playing embed, refreshed on every position tick.
pub fn create_now_playing_embed(message: &PlayMessage) -> CreateEmbed {
    let song = &message.song;

    let mut embed = CreateEmbed::default()
        .title(format!("▶️ {}", song.human_name()))
        .url(&song.url)
        .description(play_progress(message))
        .color(colors::SUCCESS_GREEN);

    if let Some(thumbnail) = &song.thumbnail_url {
        embed = embed.thumbnail(thumbnail);
    }

    embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}
