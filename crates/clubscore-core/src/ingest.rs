use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{
    compute_handicap, rank_entries, HandicapLedger, LedgerPoint, MemberId, Roster, ScoreEntry,
    ScoringError, ScoringRules, Tournament, TournamentId,
};

/// Raw upload row. `gross_score` holds the source cell as written, `None`
/// when the row had no such cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreRow {
    pub member_id: String,
    pub gross_score: Option<String>,
}

/// Accepted input for one member in one tournament: everything the chain
/// replay needs to re-derive a [`ScoreEntry`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreCard {
    pub tournament_id: TournamentId,
    pub member_id: MemberId,
    pub display_name: String,
    pub gross_score: u32,
}

impl ScoreCard {
    /// Takes the member's current roster name; unknown members keep theirs.
    #[must_use]
    pub fn with_roster_name(mut self, roster: &Roster) -> Self {
        if let Some(member) = roster.get(&self.member_id) {
            self.display_name.clone_from(&member.display_name);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingMemberId,
    UnknownMember,
    MissingGrossScore,
    InvalidGrossScore,
    NonPositiveGrossScore,
    GrossScoreOutOfRange,
    DuplicateMember,
}

impl RejectReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingMemberId => "missing_member_id",
            Self::UnknownMember => "unknown_member",
            Self::MissingGrossScore => "missing_gross_score",
            Self::InvalidGrossScore => "invalid_gross_score",
            Self::NonPositiveGrossScore => "non_positive_gross_score",
            Self::GrossScoreOutOfRange => "gross_score_out_of_range",
            Self::DuplicateMember => "duplicate_member",
        }
    }
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::MissingMemberId => "member id is blank",
            Self::UnknownMember => "member is not on the roster",
            Self::MissingGrossScore => "gross score is missing",
            Self::InvalidGrossScore => "gross score is not a whole number",
            Self::NonPositiveGrossScore => "gross score must be positive",
            Self::GrossScoreOutOfRange => "gross score is out of range",
            Self::DuplicateMember => "member already appears earlier in this batch",
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedRow {
    /// 1-based position of the row in the uploaded batch.
    pub row_number: usize,
    pub row: ScoreRow,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchValidation {
    pub accepted: Vec<ScoreCard>,
    pub rejected: Vec<RejectedRow>,
}

/// Splits a raw batch into accepted cards and per-row rejections.
///
/// The first row for a member wins; later rows for the same member are
/// rejected as duplicates. Rejections never abort the batch.
#[must_use]
pub fn validate_batch(
    tournament_id: TournamentId,
    rows: &[ScoreRow],
    roster: &Roster,
) -> BatchValidation {
    let mut validation = BatchValidation::default();
    let mut seen = BTreeSet::new();

    for (index, row) in rows.iter().enumerate() {
        let verdict = check_row(row, roster, &seen);
        match verdict {
            Ok(card) => {
                seen.insert(card.member_id.clone());
                validation.accepted.push(ScoreCard {
                    tournament_id,
                    ..card
                });
            }
            Err(reason) => validation.rejected.push(RejectedRow {
                row_number: index + 1,
                row: row.clone(),
                reason,
            }),
        }
    }

    validation
}

fn check_row(
    row: &ScoreRow,
    roster: &Roster,
    seen: &BTreeSet<MemberId>,
) -> Result<ScoreCard, RejectReason> {
    let member_id = MemberId::parse(&row.member_id).map_err(|_| RejectReason::MissingMemberId)?;
    let member = roster
        .get(&member_id)
        .ok_or(RejectReason::UnknownMember)?;
    let gross = parse_gross_score(row.gross_score.as_deref().unwrap_or_default())?;
    if gross <= 0 {
        return Err(RejectReason::NonPositiveGrossScore);
    }
    let gross_score = u32::try_from(gross).map_err(|_| RejectReason::GrossScoreOutOfRange)?;
    if seen.contains(&member_id) {
        return Err(RejectReason::DuplicateMember);
    }

    Ok(ScoreCard {
        tournament_id: TournamentId(0),
        member_id,
        display_name: member.display_name.clone(),
        gross_score,
    })
}

/// Whole strokes from a raw cell. Spreadsheet exports write `90` as `90.0`,
/// so a zero fraction is accepted.
fn parse_gross_score(raw: &str) -> Result<i64, RejectReason> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RejectReason::MissingGrossScore);
    }
    let whole = raw.strip_suffix(".0").unwrap_or(raw);
    whole.parse::<i64>().map_err(|_| {
        let digits = whole.strip_prefix('-').unwrap_or(whole);
        if !digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit()) {
            RejectReason::GrossScoreOutOfRange
        } else {
            RejectReason::InvalidGrossScore
        }
    })
}

/// Replays the handicap chain over `tournaments` in `(date, id)` order.
///
/// `ledger` must hold the history before the earliest tournament in the
/// slice; any points it holds from that date onward are discarded first.
/// On return it also holds the replayed points. Entries are returned per
/// tournament in chronological order, each tournament ranked.
///
/// # Errors
/// Returns [`ScoringError::Consistency`] when a card names a tournament
/// outside `tournaments`.
pub fn replay_chain(
    tournaments: &[Tournament],
    cards: &[ScoreCard],
    ledger: &mut HandicapLedger,
    rules: &ScoringRules,
) -> Result<Vec<ScoreEntry>, ScoringError> {
    let mut ordered: Vec<&Tournament> = tournaments.iter().collect();
    ordered.sort_by_key(|tournament| (tournament.date, tournament.tournament_id));
    ordered.dedup_by_key(|tournament| tournament.tournament_id);

    let mut cards_by_tournament: BTreeMap<TournamentId, Vec<&ScoreCard>> = ordered
        .iter()
        .map(|tournament| (tournament.tournament_id, Vec::new()))
        .collect();
    for card in cards {
        cards_by_tournament
            .get_mut(&card.tournament_id)
            .ok_or_else(|| {
                ScoringError::Consistency(format!(
                    "score card for member {} references tournament {} outside the replay window",
                    card.member_id, card.tournament_id
                ))
            })?
            .push(card);
    }

    if let Some(first) = ordered.first() {
        ledger.truncate_from(first.date);
    }

    let mut replayed = Vec::with_capacity(cards.len());
    for tournament in ordered {
        let round_cards = cards_by_tournament
            .remove(&tournament.tournament_id)
            .unwrap_or_default();
        let entries: Vec<ScoreEntry> = round_cards
            .into_iter()
            .map(|card| {
                let previous = ledger.handicap_before(&card.member_id, tournament.date);
                let outcome = compute_handicap(previous, card.gross_score, rules);
                ScoreEntry {
                    tournament_id: tournament.tournament_id,
                    member_id: card.member_id.clone(),
                    display_name: card.display_name.clone(),
                    gross_score: card.gross_score,
                    previous_handicap: outcome.previous_handicap,
                    net_score: outcome.net_score,
                    handicap_change: outcome.handicap_change,
                    new_handicap: outcome.new_handicap,
                    rank: 0,
                    points: 0,
                    ruleset_version: rules.ruleset_version,
                }
            })
            .collect();

        let ranked = rank_entries(entries, &rules.points_table)?;
        for entry in &ranked {
            ledger.record(
                &entry.member_id,
                LedgerPoint {
                    date: tournament.date,
                    tournament_id: tournament.tournament_id,
                    new_handicap: entry.new_handicap,
                },
            );
        }
        replayed.extend(ranked);
    }

    Ok(replayed)
}

/// Recomputes every tournament from stored gross scores.
///
/// # Errors
/// Propagates [`replay_chain`] and ruleset validation errors.
pub fn replay_season(
    tournaments: &[Tournament],
    cards: &[ScoreCard],
    rules: &ScoringRules,
) -> Result<Vec<ScoreEntry>, ScoringError> {
    rules.validate()?;
    let mut ledger = HandicapLedger::new();
    replay_chain(tournaments, cards, &mut ledger, rules)
}

/// Stored state an ingestion plan is computed against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeasonSnapshot {
    pub tournaments: Vec<Tournament>,
    pub entries: Vec<ScoreEntry>,
}

/// Result of planning one ingestion: what to report and what to persist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestPlan {
    pub tournament_id: TournamentId,
    /// Ranked entries of the target tournament.
    pub accepted: Vec<ScoreEntry>,
    pub rejected: Vec<RejectedRow>,
    /// Tournaments other than the target whose stored entries are replaced.
    pub recomputed_tournaments: Vec<TournamentId>,
    /// Full replacement set for the target and every recomputed tournament.
    pub replacement: Vec<ScoreEntry>,
}

impl IngestPlan {
    /// Every tournament whose stored entries the plan replaces.
    #[must_use]
    pub fn replaced_tournaments(&self) -> Vec<TournamentId> {
        let mut ids = vec![self.tournament_id];
        ids.extend(self.recomputed_tournaments.iter().copied());
        ids
    }
}

/// Plans a replace-style ingestion of `rows` into `tournament_id`.
///
/// Every tournament dated on or after the target is replayed from its
/// stored gross scores, so a late upload for an early round cascades
/// through the handicap chain.
///
/// # Errors
/// Returns [`ScoringError::Configuration`] for an invalid ruleset and
/// [`ScoringError::Consistency`] when the target tournament or the date of a
/// stored entry's tournament cannot be resolved.
pub fn plan_ingestion(
    tournament_id: TournamentId,
    rows: &[ScoreRow],
    roster: &Roster,
    snapshot: &SeasonSnapshot,
    rules: &ScoringRules,
) -> Result<IngestPlan, ScoringError> {
    rules.validate()?;

    let tournaments: BTreeMap<TournamentId, Tournament> = snapshot
        .tournaments
        .iter()
        .map(|tournament| (tournament.tournament_id, tournament.clone()))
        .collect();
    let target = tournaments.get(&tournament_id).ok_or_else(|| {
        ScoringError::Consistency(format!("tournament {tournament_id} does not exist"))
    })?;
    let cutoff = target.date;

    let mut ledger = HandicapLedger::from_entries(&snapshot.entries, &tournaments)?;
    ledger.truncate_from(cutoff);

    let suffix: Vec<Tournament> = tournaments
        .values()
        .filter(|tournament| tournament.date >= cutoff)
        .cloned()
        .collect();

    let validation = validate_batch(tournament_id, rows, roster);

    let mut cards = validation.accepted;
    let mut later_with_scores = BTreeSet::new();
    for entry in &snapshot.entries {
        if entry.tournament_id == tournament_id {
            continue;
        }
        let date = tournaments
            .get(&entry.tournament_id)
            .map(|tournament| tournament.date)
            .ok_or_else(|| {
                ScoringError::Consistency(format!(
                    "tournament {} has scores but no record",
                    entry.tournament_id
                ))
            })?;
        if date >= cutoff {
            later_with_scores.insert(entry.tournament_id);
            cards.push(entry.card().with_roster_name(roster));
        }
    }

    let replacement = replay_chain(&suffix, &cards, &mut ledger, rules)?;

    let accepted = replacement
        .iter()
        .filter(|entry| entry.tournament_id == tournament_id)
        .cloned()
        .collect();
    let recomputed_tournaments = suffix
        .iter()
        .map(|tournament| tournament.tournament_id)
        .filter(|id| later_with_scores.contains(id))
        .collect();

    Ok(IngestPlan {
        tournament_id,
        accepted,
        rejected: validation.rejected,
        recomputed_tournaments,
        replacement,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use crate::fixtures::{approx, member, must, row, tournament};
    use crate::roster_from;
    use proptest::prelude::*;

    fn roster() -> Roster {
        roster_from(vec![
            member("A", "Alice", "A"),
            member("B", "Bob", "A"),
            member("C", "Carol", "B"),
        ])
    }

    fn season() -> Vec<Tournament> {
        vec![
            tournament(1, "2026-03-01"),
            tournament(2, "2026-04-01"),
            tournament(3, "2026-05-01"),
        ]
    }

    fn apply(snapshot: &mut SeasonSnapshot, plan: &IngestPlan) {
        let replaced = plan.replaced_tournaments();
        snapshot
            .entries
            .retain(|entry| !replaced.contains(&entry.tournament_id));
        snapshot.entries.extend(plan.replacement.iter().cloned());
        snapshot
            .entries
            .sort_by(|a, b| (a.tournament_id, a.rank).cmp(&(b.tournament_id, b.rank)));
    }

    fn entry_for<'a>(
        snapshot: &'a SeasonSnapshot,
        tournament_id: i64,
        member_id: &str,
    ) -> &'a ScoreEntry {
        match snapshot.entries.iter().find(|entry| {
            entry.tournament_id == TournamentId(tournament_id) && entry.member_id.as_str() == member_id
        }) {
            Some(entry) => entry,
            None => panic!("missing entry for {member_id} in {tournament_id}"),
        }
    }

    #[test]
    fn validate_batch_collects_rejections_without_aborting() {
        let rows = vec![
            row("A", 80),
            row("ZZZ", 70),
            ScoreRow {
                member_id: "B".to_string(),
                gross_score: None,
            },
            row("C", 0),
            row("A", 90),
            row("  ", 72),
            row("B", i64::from(u32::MAX) + 1),
        ];
        let validation = validate_batch(TournamentId(7), &rows, &roster());

        assert_eq!(validation.accepted.len(), 1);
        assert_eq!(validation.accepted[0].tournament_id, TournamentId(7));
        assert_eq!(validation.accepted[0].display_name, "Alice");

        let reasons: Vec<(usize, RejectReason)> = validation
            .rejected
            .iter()
            .map(|rejected| (rejected.row_number, rejected.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (2, RejectReason::UnknownMember),
                (3, RejectReason::MissingGrossScore),
                (4, RejectReason::NonPositiveGrossScore),
                (5, RejectReason::DuplicateMember),
                (6, RejectReason::MissingMemberId),
                (7, RejectReason::GrossScoreOutOfRange),
            ]
        );
    }

    #[test]
    fn rejected_first_row_does_not_block_later_valid_row() {
        let rows = vec![row("A", -3), row("A", 81)];
        let validation = validate_batch(TournamentId(1), &rows, &roster());
        assert_eq!(validation.accepted.len(), 1);
        assert_eq!(validation.accepted[0].gross_score, 81);
    }

    #[test]
    fn gross_score_cells_separate_missing_from_malformed() {
        let cell = |member_id: &str, raw: Option<&str>| ScoreRow {
            member_id: member_id.to_string(),
            gross_score: raw.map(str::to_string),
        };
        let rows = vec![
            cell("A", Some(" 90.0 ")),
            cell("B", Some("80.5")),
            cell("B", Some("eighty")),
            cell("B", Some("")),
            cell("C", None),
            cell("C", Some("99999999999999999999")),
        ];
        let validation = validate_batch(TournamentId(1), &rows, &roster());

        assert_eq!(validation.accepted.len(), 1);
        assert_eq!(validation.accepted[0].gross_score, 90);
        let reasons: Vec<RejectReason> = validation
            .rejected
            .iter()
            .map(|rejected| rejected.reason)
            .collect();
        assert_eq!(
            reasons,
            vec![
                RejectReason::InvalidGrossScore,
                RejectReason::InvalidGrossScore,
                RejectReason::MissingGrossScore,
                RejectReason::MissingGrossScore,
                RejectReason::GrossScoreOutOfRange,
            ]
        );
        assert_eq!(validation.rejected[0].row.gross_score.as_deref(), Some("80.5"));
        assert_eq!(
            RejectReason::InvalidGrossScore.to_string(),
            "gross score is not a whole number"
        );
    }

    #[test]
    fn cascade_uses_current_roster_names() {
        let rules = ScoringRules::v1();
        let mut snapshot = SeasonSnapshot {
            tournaments: season(),
            entries: Vec::new(),
        };
        let plan = must(plan_ingestion(
            TournamentId(2),
            &[row("B", 90), row("A", 90)],
            &roster(),
            &snapshot,
            &rules,
        ));
        apply(&mut snapshot, &plan);
        assert_eq!(entry_for(&snapshot, 2, "A").rank, 1);

        let renamed = roster_from(vec![
            member("A", "Alice", "A"),
            member("B", "Aaron", "A"),
            member("C", "Carol", "B"),
        ]);
        let plan = must(plan_ingestion(
            TournamentId(1),
            &[row("C", 85)],
            &renamed,
            &snapshot,
            &rules,
        ));
        assert_eq!(plan.recomputed_tournaments, vec![TournamentId(2)]);
        apply(&mut snapshot, &plan);

        let bob = entry_for(&snapshot, 2, "B");
        assert_eq!(bob.display_name, "Aaron");
        assert_eq!(bob.rank, 1);
        assert_eq!(entry_for(&snapshot, 2, "A").rank, 2);
    }

    #[test]
    fn worked_example_ranks_by_net_then_gross() {
        let mut rules = ScoringRules::v1();
        rules.default_handicap = 10.0;
        let tournaments = vec![
            tournament(1, "2026-01-10"),
            tournament(2, "2026-02-10"),
        ];
        let prior = vec![
            ScoreEntry {
                tournament_id: TournamentId(1),
                member_id: MemberId("B".to_string()),
                display_name: "Bob".to_string(),
                gross_score: 70,
                previous_handicap: 5.0,
                net_score: 65.0,
                handicap_change: 0.0,
                new_handicap: 5.0,
                rank: 1,
                points: 10,
                ruleset_version: 1,
            },
            ScoreEntry {
                tournament_id: TournamentId(1),
                member_id: MemberId("C".to_string()),
                display_name: "Carol".to_string(),
                gross_score: 80,
                previous_handicap: 8.0,
                net_score: 72.0,
                handicap_change: 0.0,
                new_handicap: 8.0,
                rank: 2,
                points: 8,
                ruleset_version: 1,
            },
        ];
        let mut snapshot = SeasonSnapshot {
            tournaments,
            entries: prior,
        };

        // Seed the stored chain without replaying it, so B and C carry
        // handicaps 5 and 8 while A starts from the default 10.
        let plan = must(plan_ingestion(
            TournamentId(2),
            &[row("A", 80), row("B", 75), row("C", 75)],
            &roster(),
            &snapshot,
            &rules,
        ));
        assert!(plan.recomputed_tournaments.is_empty());

        let ranked: Vec<(&str, f64, u32)> = plan
            .accepted
            .iter()
            .map(|entry| (entry.member_id.as_str(), entry.net_score, entry.rank))
            .collect();
        assert_eq!(
            ranked,
            vec![("C", 67.0, 1), ("B", 70.0, 2), ("A", 70.0, 3)]
        );
        let points: Vec<u32> = plan.accepted.iter().map(|entry| entry.points).collect();
        assert_eq!(points, vec![10, 8, 6]);

        apply(&mut snapshot, &plan);
        assert_eq!(snapshot.entries.len(), 5);
    }

    #[test]
    fn reingest_is_idempotent() {
        let rules = ScoringRules::v1();
        let mut snapshot = SeasonSnapshot {
            tournaments: season(),
            entries: Vec::new(),
        };
        let rows = vec![row("A", 82), row("B", 90), row("C", 77)];

        let first = must(plan_ingestion(
            TournamentId(2),
            &rows,
            &roster(),
            &snapshot,
            &rules,
        ));
        apply(&mut snapshot, &first);
        let once = snapshot.clone();

        let second = must(plan_ingestion(
            TournamentId(2),
            &rows,
            &roster(),
            &snapshot,
            &rules,
        ));
        apply(&mut snapshot, &second);
        assert_eq!(snapshot, once);
        assert_eq!(first, second);
    }

    #[test]
    fn reingest_drops_members_missing_from_new_batch() {
        let rules = ScoringRules::v1();
        let mut snapshot = SeasonSnapshot {
            tournaments: season(),
            entries: Vec::new(),
        };
        let plan = must(plan_ingestion(
            TournamentId(1),
            &[row("A", 82), row("B", 90)],
            &roster(),
            &snapshot,
            &rules,
        ));
        apply(&mut snapshot, &plan);

        let plan = must(plan_ingestion(
            TournamentId(1),
            &[row("C", 79)],
            &roster(),
            &snapshot,
            &rules,
        ));
        apply(&mut snapshot, &plan);

        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].member_id.as_str(), "C");
        assert_eq!(snapshot.entries[0].rank, 1);
    }

    #[test]
    fn earlier_upload_cascades_into_later_rounds() {
        let rules = ScoringRules::v1();
        let mut snapshot = SeasonSnapshot {
            tournaments: season(),
            entries: Vec::new(),
        };

        let plan = must(plan_ingestion(
            TournamentId(3),
            &[row("A", 90), row("B", 85)],
            &roster(),
            &snapshot,
            &rules,
        ));
        apply(&mut snapshot, &plan);
        assert_eq!(entry_for(&snapshot, 3, "A").previous_handicap, 18.0);

        let plan = must(plan_ingestion(
            TournamentId(1),
            &[row("A", 100)],
            &roster(),
            &snapshot,
            &rules,
        ));
        assert_eq!(plan.recomputed_tournaments, vec![TournamentId(3)]);
        apply(&mut snapshot, &plan);

        let first = entry_for(&snapshot, 1, "A").new_handicap;
        let later = entry_for(&snapshot, 3, "A");
        assert!(approx(later.previous_handicap, first));
        assert!(approx(first, 19.0));
        assert_eq!(entry_for(&snapshot, 3, "B").previous_handicap, 18.0);
    }

    #[test]
    fn same_day_rounds_do_not_chain() {
        let rules = ScoringRules::v1();
        let mut snapshot = SeasonSnapshot {
            tournaments: vec![
                tournament(1, "2026-03-01"),
                tournament(2, "2026-03-01"),
                tournament(3, "2026-03-08"),
            ],
            entries: Vec::new(),
        };
        for id in [1, 2] {
            let plan = must(plan_ingestion(
                TournamentId(id),
                &[row("A", 100)],
                &roster(),
                &snapshot,
                &rules,
            ));
            apply(&mut snapshot, &plan);
        }
        assert_eq!(entry_for(&snapshot, 2, "A").previous_handicap, 18.0);

        let plan = must(plan_ingestion(
            TournamentId(3),
            &[row("A", 100)],
            &roster(),
            &snapshot,
            &rules,
        ));
        apply(&mut snapshot, &plan);
        let round_two = entry_for(&snapshot, 2, "A").new_handicap;
        assert!(approx(
            entry_for(&snapshot, 3, "A").previous_handicap,
            round_two
        ));
    }

    #[test]
    fn unknown_target_is_a_consistency_error() {
        let result = plan_ingestion(
            TournamentId(99),
            &[row("A", 80)],
            &roster(),
            &SeasonSnapshot {
                tournaments: season(),
                entries: Vec::new(),
            },
            &ScoringRules::v1(),
        );
        assert!(matches!(result, Err(ScoringError::Consistency(_))));
    }

    #[test]
    fn orphaned_stored_entry_is_a_consistency_error() {
        let orphan = ScoreEntry {
            tournament_id: TournamentId(42),
            member_id: MemberId("A".to_string()),
            display_name: "Alice".to_string(),
            gross_score: 80,
            previous_handicap: 18.0,
            net_score: 62.0,
            handicap_change: -1.0,
            new_handicap: 17.0,
            rank: 1,
            points: 10,
            ruleset_version: 1,
        };
        let result = plan_ingestion(
            TournamentId(1),
            &[row("A", 80)],
            &roster(),
            &SeasonSnapshot {
                tournaments: season(),
                entries: vec![orphan],
            },
            &ScoringRules::v1(),
        );
        assert!(matches!(result, Err(ScoringError::Consistency(_))));
    }

    #[test]
    fn invalid_rules_are_a_configuration_error() {
        let mut rules = ScoringRules::v1();
        rules.points_table.clear();
        let result = plan_ingestion(
            TournamentId(1),
            &[row("A", 80)],
            &roster(),
            &SeasonSnapshot {
                tournaments: season(),
                entries: Vec::new(),
            },
            &rules,
        );
        assert!(matches!(result, Err(ScoringError::Configuration(_))));
    }

    #[test]
    fn replay_chain_rejects_cards_outside_window() {
        let mut ledger = HandicapLedger::new();
        let card = ScoreCard {
            tournament_id: TournamentId(9),
            member_id: MemberId("A".to_string()),
            display_name: "Alice".to_string(),
            gross_score: 80,
        };
        let result = replay_chain(&season(), &[card], &mut ledger, &ScoringRules::v1());
        assert!(matches!(result, Err(ScoringError::Consistency(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn incremental_ingestion_matches_full_replay(
            scores in proptest::collection::vec(
                proptest::collection::vec(proptest::option::of(65i64..120), 3),
                3,
            ),
            order in Just(vec![0usize, 1, 2]).prop_shuffle(),
        ) {
            let rules = ScoringRules::v1();
            let ids = ["A", "B", "C"];
            let batches: Vec<Vec<ScoreRow>> = scores
                .iter()
                .map(|round| {
                    round
                        .iter()
                        .zip(ids)
                        .filter_map(|(gross, id)| gross.map(|gross| row(id, gross)))
                        .collect()
                })
                .collect();

            let mut snapshot = SeasonSnapshot {
                tournaments: season(),
                entries: Vec::new(),
            };
            for index in order {
                let tournament_id = TournamentId(i64::try_from(index).unwrap_or(0) + 1);
                let plan = must(plan_ingestion(
                    tournament_id,
                    &batches[index],
                    &roster(),
                    &snapshot,
                    &rules,
                ));
                apply(&mut snapshot, &plan);
            }

            let cards: Vec<ScoreCard> = snapshot.entries.iter().map(ScoreEntry::card).collect();
            let mut replayed = must(replay_season(&season(), &cards, &rules));
            replayed.sort_by(|a, b| (a.tournament_id, a.rank).cmp(&(b.tournament_id, b.rank)));
            prop_assert_eq!(&snapshot.entries, &replayed);

            for entry in &snapshot.entries {
                let earlier = snapshot
                    .entries
                    .iter()
                    .filter(|other| other.member_id == entry.member_id && other.tournament_id < entry.tournament_id)
                    .max_by_key(|other| other.tournament_id);
                match earlier {
                    Some(previous) => prop_assert!(approx(entry.previous_handicap, previous.new_handicap)),
                    None => prop_assert!(approx(entry.previous_handicap, rules.default_handicap)),
                }
            }
        }
    }
}
