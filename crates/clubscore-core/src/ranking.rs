use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::{points_from_table, ScoreEntry, ScoringError};

/// Total order used for placement: net score, then gross score, then
/// display name, then member id.
#[must_use]
pub fn compare_entries(left: &ScoreEntry, right: &ScoreEntry) -> Ordering {
    left.net_score
        .total_cmp(&right.net_score)
        .then(left.gross_score.cmp(&right.gross_score))
        .then_with(|| left.display_name.cmp(&right.display_name))
        .then_with(|| left.member_id.cmp(&right.member_id))
}

/// Assigns 1-based ranks and points to the entries of one tournament.
///
/// Ties never share a rank. Ranks past the end of `points_table` earn 0.
///
/// # Errors
/// Returns [`ScoringError::Consistency`] when the entries span more than
/// one tournament or name the same member twice.
pub fn rank_entries(
    mut entries: Vec<ScoreEntry>,
    points_table: &[u32],
) -> Result<Vec<ScoreEntry>, ScoringError> {
    if let Some(first) = entries.first() {
        let tournament_id = first.tournament_id;
        if let Some(stray) = entries
            .iter()
            .find(|entry| entry.tournament_id != tournament_id)
        {
            return Err(ScoringError::Consistency(format!(
                "cannot rank tournaments {tournament_id} and {} together",
                stray.tournament_id
            )));
        }
    }

    let mut seen = BTreeSet::new();
    for entry in &entries {
        if !seen.insert(entry.member_id.clone()) {
            return Err(ScoringError::Consistency(format!(
                "member {} appears twice in tournament {}",
                entry.member_id, entry.tournament_id
            )));
        }
    }

    entries.sort_by(compare_entries);
    for (index, entry) in entries.iter_mut().enumerate() {
        let rank = u32::try_from(index + 1).unwrap_or(u32::MAX);
        entry.rank = rank;
        entry.points = points_from_table(points_table, rank);
    }

    Ok(entries)
}

/// Scoreboard search: substring on member id, case-insensitive substring on
/// display name. A blank term keeps every entry.
#[must_use]
pub fn filter_entries(entries: &[ScoreEntry], term: &str) -> Vec<ScoreEntry> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return entries.to_vec();
    }

    entries
        .iter()
        .filter(|entry| {
            entry.member_id.as_str().to_lowercase().contains(&needle)
                || entry.display_name.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}
