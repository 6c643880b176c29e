pub mod channels;
pub mod instructions;
pub mod memory;

use crate::{Data, Error};

/// Every slash command the bot registers.
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        channels::channels(),
        instructions::instructions(),
        memory::memory(),
    ]
}

/// Clips `text` to `max` characters for an embed field or description.
pub(crate) fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}
