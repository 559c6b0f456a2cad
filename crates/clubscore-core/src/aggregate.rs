use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    round_hundredths, Gender, MemberId, Roster, ScoreEntry, ScoringError, Tournament,
    TournamentId,
};

/// One contributing round inside an [`AnnualStatRow`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TournamentDetail {
    pub tournament_id: TournamentId,
    pub tournament_name: String,
    pub date: Date,
    pub gross_score: u32,
    pub previous_handicap: f64,
    pub net_score: f64,
    pub handicap_change: f64,
    pub new_handicap: f64,
    pub rank: u32,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnualStatRow {
    pub member_id: MemberId,
    pub display_name: String,
    pub gender: Gender,
    pub classification: String,
    pub avg_gross_score: f64,
    pub participation_count: usize,
    pub avg_handicap: f64,
    pub total_points: u64,
    /// Contributing rounds in `(date, tournament_id)` order.
    pub tournaments: Vec<TournamentDetail>,
}

impl AnnualStatRow {
    /// `previous_handicap` of the first round minus `new_handicap` of the
    /// last; `None` with fewer than two rounds.
    #[must_use]
    pub fn improvement(&self) -> Option<(f64, f64, f64)> {
        if self.tournaments.len() < 2 {
            return None;
        }
        let initial = self.tournaments.first()?.previous_handicap;
        let last = self.tournaments.last()?.new_handicap;
        Some((initial, last, round_hundredths(initial - last)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportLimits {
    pub top_points: usize,
    pub top_scores: usize,
    pub top_improvements: usize,
}

impl Default for ReportLimits {
    fn default() -> Self {
        Self {
            top_points: 10,
            top_scores: 10,
            top_improvements: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PointsStanding {
    pub member_id: MemberId,
    pub display_name: String,
    pub total_points: u64,
    pub participation_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreStanding {
    pub member_id: MemberId,
    pub display_name: String,
    pub avg_gross_score: f64,
    pub participation_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImprovementStanding {
    pub member_id: MemberId,
    pub display_name: String,
    pub initial_handicap: f64,
    pub final_handicap: f64,
    pub improvement: f64,
    pub participation_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub member_id: MemberId,
    pub display_name: String,
    pub participation_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationAverage {
    pub classification: String,
    pub entry_count: usize,
    pub avg_handicap: f64,
    pub avg_gross_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnualReport {
    /// Selected tournaments, de-duplicated, in `(date, tournament_id)` order.
    pub tournament_ids: Vec<TournamentId>,
    pub rows: Vec<AnnualStatRow>,
    pub top_points: Vec<PointsStanding>,
    pub top_scores: Vec<ScoreStanding>,
    pub top_improvements: Vec<ImprovementStanding>,
    pub perfect_attendance: Vec<AttendanceRecord>,
    pub classification_averages: Vec<ClassificationAverage>,
}

struct Selection<'a> {
    ordered: Vec<&'a Tournament>,
    by_id: BTreeMap<TournamentId, &'a Tournament>,
}

fn resolve_selection<'a>(
    selection: &[TournamentId],
    tournaments: &'a [Tournament],
) -> Result<Selection<'a>, ScoringError> {
    let known: BTreeMap<TournamentId, &Tournament> = tournaments
        .iter()
        .map(|tournament| (tournament.tournament_id, tournament))
        .collect();

    let mut by_id = BTreeMap::new();
    for id in selection.iter().collect::<BTreeSet<_>>() {
        let tournament = known.get(id).ok_or_else(|| {
            ScoringError::Consistency(format!(
                "selected tournament {id} has no tournament record"
            ))
        })?;
        by_id.insert(*id, *tournament);
    }

    let mut ordered: Vec<&Tournament> = by_id.values().copied().collect();
    ordered.sort_by_key(|tournament| (tournament.date, tournament.tournament_id));
    Ok(Selection { ordered, by_id })
}

/// Per-member statistics over an explicit tournament selection.
///
/// An empty selection yields no rows. Duplicate ids are collapsed. Rows are
/// ordered by member id.
///
/// # Errors
/// Returns [`ScoringError::Consistency`] when a selected id has no
/// tournament record or a contributing member is missing from the roster.
pub fn aggregate(
    selection: &[TournamentId],
    tournaments: &[Tournament],
    entries: &[ScoreEntry],
    roster: &Roster,
) -> Result<Vec<AnnualStatRow>, ScoringError> {
    if selection.is_empty() {
        return Ok(Vec::new());
    }
    let selection = resolve_selection(selection, tournaments)?;
    build_rows(&selection, entries, roster)
}

fn build_rows(
    selection: &Selection<'_>,
    entries: &[ScoreEntry],
    roster: &Roster,
) -> Result<Vec<AnnualStatRow>, ScoringError> {
    let mut by_member: BTreeMap<&MemberId, Vec<(&Tournament, &ScoreEntry)>> = BTreeMap::new();
    for entry in entries {
        if let Some(tournament) = selection.by_id.get(&entry.tournament_id) {
            by_member
                .entry(&entry.member_id)
                .or_default()
                .push((tournament, entry));
        }
    }

    let mut rows = Vec::with_capacity(by_member.len());
    for (member_id, mut rounds) in by_member {
        let member = roster.get(member_id).ok_or_else(|| {
            ScoringError::Consistency(format!(
                "member {member_id} has scores but is missing from the roster"
            ))
        })?;
        rounds.sort_by_key(|(tournament, _)| (tournament.date, tournament.tournament_id));

        let count = rounds.len();
        let total_gross: f64 = rounds
            .iter()
            .map(|(_, entry)| f64::from(entry.gross_score))
            .sum();
        let total_handicap: f64 = rounds.iter().map(|(_, entry)| entry.new_handicap).sum();
        let total_points: u64 = rounds
            .iter()
            .map(|(_, entry)| u64::from(entry.points))
            .sum();
        let divisor = count_as_f64(count);

        rows.push(AnnualStatRow {
            member_id: member.member_id.clone(),
            display_name: member.display_name.clone(),
            gender: member.gender,
            classification: member.classification.clone(),
            avg_gross_score: round_hundredths(total_gross / divisor),
            participation_count: count,
            avg_handicap: round_hundredths(total_handicap / divisor),
            total_points,
            tournaments: rounds
                .into_iter()
                .map(|(tournament, entry)| TournamentDetail {
                    tournament_id: tournament.tournament_id,
                    tournament_name: tournament.name.clone(),
                    date: tournament.date,
                    gross_score: entry.gross_score,
                    previous_handicap: entry.previous_handicap,
                    net_score: entry.net_score,
                    handicap_change: entry.handicap_change,
                    new_handicap: entry.new_handicap,
                    rank: entry.rank,
                    points: entry.points,
                })
                .collect(),
        });
    }

    Ok(rows)
}

fn count_as_f64(count: usize) -> f64 {
    u32::try_from(count).map_or(f64::from(u32::MAX), f64::from)
}

fn by_name(left: &AnnualStatRow, right: &AnnualStatRow) -> Ordering {
    left.display_name
        .cmp(&right.display_name)
        .then_with(|| left.member_id.cmp(&right.member_id))
}

#[must_use]
pub fn top_points(rows: &[AnnualStatRow], limit: usize) -> Vec<PointsStanding> {
    let mut sorted: Vec<&AnnualStatRow> = rows.iter().collect();
    sorted.sort_by(|left, right| {
        right
            .total_points
            .cmp(&left.total_points)
            .then_with(|| by_name(left, right))
    });
    sorted
        .into_iter()
        .take(limit)
        .map(|row| PointsStanding {
            member_id: row.member_id.clone(),
            display_name: row.display_name.clone(),
            total_points: row.total_points,
            participation_count: row.participation_count,
        })
        .collect()
}

#[must_use]
pub fn top_scores(rows: &[AnnualStatRow], limit: usize) -> Vec<ScoreStanding> {
    let mut sorted: Vec<&AnnualStatRow> = rows.iter().collect();
    sorted.sort_by(|left, right| {
        left.avg_gross_score
            .total_cmp(&right.avg_gross_score)
            .then_with(|| by_name(left, right))
    });
    sorted
        .into_iter()
        .take(limit)
        .map(|row| ScoreStanding {
            member_id: row.member_id.clone(),
            display_name: row.display_name.clone(),
            avg_gross_score: row.avg_gross_score,
            participation_count: row.participation_count,
        })
        .collect()
}

/// Largest handicap drops first. Members with a single round are skipped.
#[must_use]
pub fn top_improvements(rows: &[AnnualStatRow], limit: usize) -> Vec<ImprovementStanding> {
    let mut standings: Vec<(&AnnualStatRow, ImprovementStanding)> = rows
        .iter()
        .filter_map(|row| {
            let (initial, last, improvement) = row.improvement()?;
            Some((
                row,
                ImprovementStanding {
                    member_id: row.member_id.clone(),
                    display_name: row.display_name.clone(),
                    initial_handicap: initial,
                    final_handicap: last,
                    improvement,
                    participation_count: row.participation_count,
                },
            ))
        })
        .collect();
    standings.sort_by(|(left_row, left), (right_row, right)| {
        right
            .improvement
            .total_cmp(&left.improvement)
            .then_with(|| by_name(left_row, right_row))
    });
    standings
        .into_iter()
        .take(limit)
        .map(|(_, standing)| standing)
        .collect()
}

/// Members who played every selected tournament, ordered by name.
#[must_use]
pub fn perfect_attendance(rows: &[AnnualStatRow], selected_count: usize) -> Vec<AttendanceRecord> {
    if selected_count == 0 {
        return Vec::new();
    }
    let mut present: Vec<&AnnualStatRow> = rows
        .iter()
        .filter(|row| row.participation_count == selected_count)
        .collect();
    present.sort_by(|left, right| by_name(left, right));
    present
        .into_iter()
        .map(|row| AttendanceRecord {
            member_id: row.member_id.clone(),
            display_name: row.display_name.clone(),
            participation_count: row.participation_count,
        })
        .collect()
}

/// Entry-weighted averages per classification, sorted by classification.
#[must_use]
pub fn classification_averages(rows: &[AnnualStatRow]) -> Vec<ClassificationAverage> {
    let mut groups: BTreeMap<&str, (usize, f64, f64)> = BTreeMap::new();
    for row in rows {
        let group = groups.entry(row.classification.as_str()).or_default();
        for detail in &row.tournaments {
            group.0 += 1;
            group.1 += detail.new_handicap;
            group.2 += f64::from(detail.gross_score);
        }
    }

    groups
        .into_iter()
        .filter(|(_, (count, _, _))| *count > 0)
        .map(|(classification, (count, handicap, gross))| {
            let divisor = count_as_f64(count);
            ClassificationAverage {
                classification: classification.to_string(),
                entry_count: count,
                avg_handicap: round_hundredths(handicap / divisor),
                avg_gross_score: round_hundredths(gross / divisor),
            }
        })
        .collect()
}

/// Annual search: case-insensitive substring on display name or
/// classification, substring on member id. A blank term keeps every row.
#[must_use]
pub fn filter_stat_rows(rows: &[AnnualStatRow], term: &str) -> Vec<AnnualStatRow> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return rows.to_vec();
    }
    rows.iter()
        .filter(|row| {
            row.member_id.as_str().to_lowercase().contains(&needle)
                || row.display_name.to_lowercase().contains(&needle)
                || row.classification.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

/// Full annual view: per-member rows plus every ranked list.
///
/// # Errors
/// Propagates [`aggregate`] consistency errors; no partial report is
/// returned.
pub fn annual_report(
    selection: &[TournamentId],
    tournaments: &[Tournament],
    entries: &[ScoreEntry],
    roster: &Roster,
    limits: ReportLimits,
) -> Result<AnnualReport, ScoringError> {
    if selection.is_empty() {
        return Ok(AnnualReport {
            tournament_ids: Vec::new(),
            rows: Vec::new(),
            top_points: Vec::new(),
            top_scores: Vec::new(),
            top_improvements: Vec::new(),
            perfect_attendance: Vec::new(),
            classification_averages: Vec::new(),
        });
    }

    let resolved = resolve_selection(selection, tournaments)?;
    let rows = build_rows(&resolved, entries, roster)?;
    let selected_count = resolved.ordered.len();

    Ok(AnnualReport {
        tournament_ids: resolved
            .ordered
            .iter()
            .map(|tournament| tournament.tournament_id)
            .collect(),
        top_points: top_points(&rows, limits.top_points),
        top_scores: top_scores(&rows, limits.top_scores),
        top_improvements: top_improvements(&rows, limits.top_improvements),
        perfect_attendance: perfect_attendance(&rows, selected_count),
        classification_averages: classification_averages(&rows),
        rows,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use crate::fixtures::{member, must, row, tournament};
    use crate::{plan_ingestion, roster_from, ScoringRules, SeasonSnapshot};

    fn roster() -> Roster {
        roster_from(vec![
            member("A01", "Alice", "A"),
            member("A02", "Bob", "A"),
            member("B01", "Carol", "B"),
            member("B02", "Dan", "B"),
        ])
    }

    fn season() -> Vec<Tournament> {
        vec![
            tournament(1, "2026-03-01"),
            tournament(2, "2026-04-01"),
            tournament(3, "2026-05-01"),
        ]
    }

    fn played_season() -> SeasonSnapshot {
        let rules = ScoringRules::v1();
        let rounds = [
            (1, vec![row("A01", 95), row("A02", 84), row("B01", 88), row("B02", 101)]),
            (2, vec![row("A01", 86), row("A02", 90), row("B01", 79)]),
            (3, vec![row("A01", 82), row("A02", 88), row("B02", 97)]),
        ];
        let mut snapshot = SeasonSnapshot {
            tournaments: season(),
            entries: Vec::new(),
        };
        for (id, rows) in rounds {
            let plan = must(plan_ingestion(
                TournamentId(id),
                &rows,
                &roster(),
                &snapshot,
                &rules,
            ));
            snapshot.entries.extend(plan.replacement);
        }
        snapshot
    }

    fn all() -> Vec<TournamentId> {
        vec![TournamentId(1), TournamentId(2), TournamentId(3)]
    }

    #[test]
    fn empty_selection_yields_empty_result() {
        let snapshot = played_season();
        assert!(must(aggregate(&[], &snapshot.tournaments, &snapshot.entries, &roster())).is_empty());

        let report = must(annual_report(
            &[],
            &snapshot.tournaments,
            &snapshot.entries,
            &roster(),
            ReportLimits::default(),
        ));
        assert!(report.rows.is_empty());
        assert!(report.perfect_attendance.is_empty());
    }

    #[test]
    fn single_tournament_matches_its_scoreboard() {
        let snapshot = played_season();
        let rows = must(aggregate(
            &[TournamentId(2)],
            &snapshot.tournaments,
            &snapshot.entries,
            &roster(),
        ));
        let board: Vec<&ScoreEntry> = snapshot
            .entries
            .iter()
            .filter(|entry| entry.tournament_id == TournamentId(2))
            .collect();
        assert_eq!(rows.len(), board.len());
        for entry in board {
            let found = rows.iter().find(|row| row.member_id == entry.member_id);
            let Some(row) = found else {
                panic!("missing row for {}", entry.member_id);
            };
            assert_eq!(row.participation_count, 1);
            assert_eq!(row.avg_gross_score, f64::from(entry.gross_score));
            assert_eq!(row.avg_handicap, round_hundredths(entry.new_handicap));
            assert_eq!(row.total_points, u64::from(entry.points));
        }
    }

    #[test]
    fn rows_carry_chronological_detail_and_totals() {
        let snapshot = played_season();
        let rows = must(aggregate(
            &[TournamentId(3), TournamentId(1), TournamentId(3)],
            &snapshot.tournaments,
            &snapshot.entries,
            &roster(),
        ));
        let ids: Vec<&str> = rows.iter().map(|row| row.member_id.as_str()).collect();
        assert_eq!(ids, vec!["A01", "A02", "B01", "B02"]);

        let alice = &rows[0];
        assert_eq!(alice.participation_count, 2);
        assert_eq!(alice.avg_gross_score, 88.5);
        let detail_ids: Vec<TournamentId> = alice
            .tournaments
            .iter()
            .map(|detail| detail.tournament_id)
            .collect();
        assert_eq!(detail_ids, vec![TournamentId(1), TournamentId(3)]);
        let expected_points: u64 = alice.tournaments.iter().map(|d| u64::from(d.points)).sum();
        assert_eq!(alice.total_points, expected_points);
    }

    #[test]
    fn unknown_tournament_is_a_consistency_error() {
        let snapshot = played_season();
        let result = aggregate(
            &[TournamentId(1), TournamentId(77)],
            &snapshot.tournaments,
            &snapshot.entries,
            &roster(),
        );
        assert!(matches!(result, Err(ScoringError::Consistency(_))));
    }

    #[test]
    fn member_missing_from_roster_is_a_consistency_error() {
        let snapshot = played_season();
        let mut partial = roster();
        partial.remove(&MemberId("B02".to_string()));
        let result = aggregate(&all(), &snapshot.tournaments, &snapshot.entries, &partial);
        assert!(matches!(result, Err(ScoringError::Consistency(_))));
    }

    #[test]
    fn perfect_attendance_counts_selected_tournaments_only() {
        let snapshot = played_season();
        let everything = must(annual_report(
            &all(),
            &snapshot.tournaments,
            &snapshot.entries,
            &roster(),
            ReportLimits::default(),
        ));
        let present: Vec<&str> = everything
            .perfect_attendance
            .iter()
            .map(|record| record.member_id.as_str())
            .collect();
        assert_eq!(present, vec!["A01", "A02"]);

        let first_two = must(annual_report(
            &[TournamentId(1), TournamentId(2)],
            &snapshot.tournaments,
            &snapshot.entries,
            &roster(),
            ReportLimits::default(),
        ));
        let present: Vec<&str> = first_two
            .perfect_attendance
            .iter()
            .map(|record| record.member_id.as_str())
            .collect();
        assert_eq!(present, vec!["A01", "A02", "B01"]);
    }

    #[test]
    fn improvements_skip_single_round_members_and_sort_descending() {
        let snapshot = played_season();
        let report = must(annual_report(
            &[TournamentId(1), TournamentId(2)],
            &snapshot.tournaments,
            &snapshot.entries,
            &roster(),
            ReportLimits::default(),
        ));
        assert!(report
            .top_improvements
            .iter()
            .all(|standing| standing.member_id.as_str() != "B02"));
        assert!(report
            .top_improvements
            .windows(2)
            .all(|pair| pair[0].improvement >= pair[1].improvement));

        let alice = report
            .rows
            .iter()
            .find(|row| row.member_id.as_str() == "A01");
        let Some(alice) = alice else {
            panic!("alice missing");
        };
        let Some((initial, last, improvement)) = alice.improvement() else {
            panic!("alice has two rounds");
        };
        assert_eq!(initial, alice.tournaments[0].previous_handicap);
        assert_eq!(last, alice.tournaments[1].new_handicap);
        assert_eq!(improvement, round_hundredths(initial - last));
    }

    #[test]
    fn top_lists_honour_limits_and_order() {
        let snapshot = played_season();
        let report = must(annual_report(
            &all(),
            &snapshot.tournaments,
            &snapshot.entries,
            &roster(),
            ReportLimits {
                top_points: 2,
                top_scores: 3,
                top_improvements: 1,
            },
        ));
        assert_eq!(report.top_points.len(), 2);
        assert!(report.top_points[0].total_points >= report.top_points[1].total_points);
        assert_eq!(report.top_scores.len(), 3);
        assert!(report
            .top_scores
            .windows(2)
            .all(|pair| pair[0].avg_gross_score <= pair[1].avg_gross_score));
        assert_eq!(report.top_improvements.len(), 1);
        assert_eq!(
            report.tournament_ids,
            vec![TournamentId(1), TournamentId(2), TournamentId(3)]
        );
    }

    #[test]
    fn classification_averages_are_entry_weighted() {
        let snapshot = played_season();
        let rows = must(aggregate(
            &[TournamentId(1)],
            &snapshot.tournaments,
            &snapshot.entries,
            &roster(),
        ));
        let averages = classification_averages(&rows);
        let labels: Vec<&str> = averages
            .iter()
            .map(|average| average.classification.as_str())
            .collect();
        assert_eq!(labels, vec!["A", "B"]);
        assert_eq!(averages[0].entry_count, 2);
        assert_eq!(averages[0].avg_gross_score, 89.5);
        assert_eq!(averages[1].avg_gross_score, 94.5);
    }

    #[test]
    fn filter_matches_name_classification_or_id() {
        let snapshot = played_season();
        let rows = must(aggregate(&all(), &snapshot.tournaments, &snapshot.entries, &roster()));
        assert_eq!(filter_stat_rows(&rows, "carol").len(), 1);
        assert_eq!(filter_stat_rows(&rows, "b0").len(), 2);
        assert_eq!(filter_stat_rows(&rows, "").len(), rows.len());
    }
}
