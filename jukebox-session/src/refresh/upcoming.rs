//! Upcoming-tracks view of the managed playlist

/// Tracks strictly after the last occurrence of `current`
///
/// With nothing playing, or a current track that is not in the playlist,
/// the whole playlist is upcoming.
pub fn upcoming_tracks<'a>(track_ids: &'a [String], current: Option<&str>) -> &'a [String] {
    let Some(current) = current else {
        return track_ids;
    };

    match track_ids.iter().rposition(|id| id == current) {
        Some(index) => &track_ids[index + 1..],
        None => track_ids,
    }
}
