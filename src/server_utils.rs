use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::MAX_DISPLAY_NAME_CHARS;
use crate::types::PlayerId;

/// Killer name as reported by the host, trimmed and capped. A blank name stays
/// blank so the last known name (or the id) keeps being shown.
pub fn clip_display_name(value: &str) -> String {
    value.trim().chars().take(MAX_DISPLAY_NAME_CHARS).collect()
}

/// Drops blank ids; duplicates differing only in case collapse to one.
pub fn parse_player_ids<'a, I>(raw: I) -> Vec<PlayerId>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ids: Vec<PlayerId> = raw.into_iter().filter_map(PlayerId::parse).collect();
    ids.sort();
    ids.dedup();
    ids
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
