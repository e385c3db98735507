/// Processing recipe chosen per content class before transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The source is published unchanged.
    DirectCopy,
    /// Two H.264 renditions, high and low resolution.
    VideoLadder,
    /// A lossless and a compressed audio rendition.
    DualAudio,
}

/// Maps a content category to its strategy. Unknown categories are treated
/// as video (movie, episode and show all land here).
pub fn strategy_for(content_type: &str) -> Strategy {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "game" | "podcast" => Strategy::DirectCopy,
        "music" => Strategy::DualAudio,
        _ => Strategy::VideoLadder,
    }
}
