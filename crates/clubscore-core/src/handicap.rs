use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    clamp, round_tenths, MemberId, ScoreEntry, ScoringError, ScoringRules, Tournament,
    TournamentId,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HandicapOutcome {
    pub previous_handicap: f64,
    pub net_score: f64,
    pub handicap_change: f64,
    pub new_handicap: f64,
}

/// Derives net score and the handicap adjustment for a single round.
///
/// A missing or non-finite previous handicap starts from
/// `rules.default_handicap`. The change is clamped to
/// `±handicap_change_cap` and the new handicap to
/// `[min_handicap, max_handicap]`; both are reported in tenths.
#[must_use]
pub fn compute_handicap(
    previous_handicap: Option<f64>,
    gross_score: u32,
    rules: &ScoringRules,
) -> HandicapOutcome {
    let previous_handicap = previous_handicap
        .filter(|value| value.is_finite())
        .unwrap_or(rules.default_handicap);
    let net_score = f64::from(gross_score) - previous_handicap;

    let raw_change = (net_score - rules.scratch_baseline) / rules.handicap_divisor;
    let cap = rules.handicap_change_cap;
    let handicap_change = clamp(round_tenths(raw_change), -cap, cap);

    let new_handicap = clamp(
        round_tenths(previous_handicap + handicap_change),
        rules.min_handicap,
        rules.max_handicap,
    );

    HandicapOutcome {
        previous_handicap,
        net_score,
        handicap_change,
        new_handicap,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LedgerPoint {
    pub date: Date,
    pub tournament_id: TournamentId,
    pub new_handicap: f64,
}

/// Per-member handicap timelines ordered by `(date, tournament_id)`.
///
/// Recomputation never edits a point in the middle of a timeline: callers
/// drop the suffix from the edited date with [`HandicapLedger::truncate_from`]
/// and append the replayed points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandicapLedger {
    timelines: BTreeMap<MemberId, Vec<LedgerPoint>>,
}

impl HandicapLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds timelines from stored entries.
    ///
    /// # Errors
    /// Returns [`ScoringError::Consistency`] when an entry references a
    /// tournament that is not in `tournaments`, since its date is unknown.
    pub fn from_entries(
        entries: &[ScoreEntry],
        tournaments: &BTreeMap<TournamentId, Tournament>,
    ) -> Result<Self, ScoringError> {
        let mut ledger = Self::new();
        for entry in entries {
            let tournament = tournaments.get(&entry.tournament_id).ok_or_else(|| {
                ScoringError::Consistency(format!(
                    "score entry for member {} references unknown tournament {}",
                    entry.member_id, entry.tournament_id
                ))
            })?;
            ledger.record(
                &entry.member_id,
                LedgerPoint {
                    date: tournament.date,
                    tournament_id: entry.tournament_id,
                    new_handicap: entry.new_handicap,
                },
            );
        }
        Ok(ledger)
    }

    /// Inserts a point in timeline order, replacing any point already
    /// recorded for the same tournament.
    pub fn record(&mut self, member_id: &MemberId, point: LedgerPoint) {
        let timeline = self.timelines.entry(member_id.clone()).or_default();
        timeline.retain(|existing| existing.tournament_id != point.tournament_id);
        let position = timeline.partition_point(|existing| {
            (existing.date, existing.tournament_id) < (point.date, point.tournament_id)
        });
        timeline.insert(position, point);
    }

    /// Handicap carried into a round on `date`: the latest point strictly
    /// before that date.
    #[must_use]
    pub fn handicap_before(&self, member_id: &MemberId, date: Date) -> Option<f64> {
        self.timelines.get(member_id).and_then(|timeline| {
            timeline
                .iter()
                .rev()
                .find(|point| point.date < date)
                .map(|point| point.new_handicap)
        })
    }

    /// Drops every point dated on or after `date`.
    pub fn truncate_from(&mut self, date: Date) {
        for timeline in self.timelines.values_mut() {
            let keep = timeline.partition_point(|point| point.date < date);
            timeline.truncate(keep);
        }
        self.timelines.retain(|_, timeline| !timeline.is_empty());
    }

    #[must_use]
    pub fn timeline(&self, member_id: &MemberId) -> &[LedgerPoint] {
        self.timelines.get(member_id).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use crate::fixtures::{approx, date};
    use proptest::prelude::*;

    #[test]
    fn first_round_starts_from_default_handicap() {
        let rules = ScoringRules::v1();
        let outcome = compute_handicap(None, 95, &rules);
        assert_eq!(outcome.previous_handicap, 18.0);
        assert!(approx(outcome.net_score, 77.0));
        assert!(approx(outcome.handicap_change, 0.5));
        assert!(approx(outcome.new_handicap, 18.5));
    }

    #[test]
    fn non_finite_previous_handicap_uses_default() {
        let rules = ScoringRules::v1();
        let outcome = compute_handicap(Some(f64::NAN), 90, &rules);
        assert_eq!(outcome.previous_handicap, rules.default_handicap);
    }

    #[test]
    fn change_is_capped_in_both_directions() {
        let rules = ScoringRules::v1();
        let blowup = compute_handicap(Some(10.0), 140, &rules);
        assert!(approx(blowup.handicap_change, 2.0));
        assert!(approx(blowup.new_handicap, 12.0));

        let hot_round = compute_handicap(Some(10.0), 40, &rules);
        assert!(approx(hot_round.handicap_change, -2.0));
        assert!(approx(hot_round.new_handicap, 8.0));
    }

    #[test]
    fn new_handicap_is_clamped_to_range() {
        let rules = ScoringRules::v1();
        let floor = compute_handicap(Some(0.5), 60, &rules);
        assert_eq!(floor.new_handicap, 0.0);

        let ceiling = compute_handicap(Some(35.5), 130, &rules);
        assert_eq!(ceiling.new_handicap, 36.0);
    }

    #[test]
    fn zero_baseline_matches_plain_formula() {
        let mut rules = ScoringRules::v1();
        rules.scratch_baseline = 0.0;
        rules.handicap_change_cap = 100.0;
        rules.max_handicap = 100.0;
        let outcome = compute_handicap(Some(10.0), 80, &rules);
        assert!(approx(outcome.net_score, 70.0));
        assert!(approx(outcome.handicap_change, 7.0));
        assert!(approx(outcome.new_handicap, 17.0));
    }

    #[test]
    fn ledger_reads_latest_strictly_earlier_point() {
        let member = MemberId("A001".to_string());
        let mut ledger = HandicapLedger::new();
        ledger.record(
            &member,
            LedgerPoint {
                date: date("2026-04-01"),
                tournament_id: TournamentId(2),
                new_handicap: 11.0,
            },
        );
        ledger.record(
            &member,
            LedgerPoint {
                date: date("2026-03-01"),
                tournament_id: TournamentId(1),
                new_handicap: 12.0,
            },
        );

        assert_eq!(ledger.handicap_before(&member, date("2026-03-01")), None);
        assert_eq!(
            ledger.handicap_before(&member, date("2026-04-01")),
            Some(12.0)
        );
        assert_eq!(
            ledger.handicap_before(&member, date("2026-05-01")),
            Some(11.0)
        );

        ledger.truncate_from(date("2026-04-01"));
        assert_eq!(ledger.timeline(&member).len(), 1);
        assert_eq!(
            ledger.handicap_before(&member, date("2026-05-01")),
            Some(12.0)
        );
    }

    #[test]
    fn ledger_record_replaces_same_tournament() {
        let member = MemberId("A001".to_string());
        let mut ledger = HandicapLedger::new();
        for handicap in [12.0, 9.5] {
            ledger.record(
                &member,
                LedgerPoint {
                    date: date("2026-03-01"),
                    tournament_id: TournamentId(1),
                    new_handicap: handicap,
                },
            );
        }
        assert_eq!(ledger.timeline(&member).len(), 1);
        assert_eq!(ledger.timeline(&member)[0].new_handicap, 9.5);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(96))]

        #[test]
        fn handicap_stays_within_bounds_and_cap(
            previous in proptest::option::of(0.0f64..36.0),
            gross in 1u32..200,
        ) {
            let rules = ScoringRules::v1();
            let outcome = compute_handicap(previous, gross, &rules);
            prop_assert!(outcome.new_handicap >= rules.min_handicap);
            prop_assert!(outcome.new_handicap <= rules.max_handicap);
            prop_assert!(outcome.handicap_change.abs() <= rules.handicap_change_cap);
            prop_assert!(
                (outcome.new_handicap - outcome.previous_handicap).abs()
                    <= rules.handicap_change_cap + 0.051
            );
            prop_assert_eq!(outcome, compute_handicap(previous, gross, &rules));
        }
    }
}
