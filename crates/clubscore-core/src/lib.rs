//! Deterministic scoring engine for club tournaments.
//!
//! The crate is pure: every entry point takes the data it needs (roster,
//! tournaments, stored score entries, a [`ScoringRules`] value) and returns
//! derived data. Persistence and clocks live in the store crate.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::macros::format_description;
use time::Date;

mod aggregate;
mod export;
mod handicap;
mod ingest;
mod ranking;

pub use aggregate::{
    aggregate, annual_report, classification_averages, filter_stat_rows, perfect_attendance,
    top_improvements, top_points, top_scores, AnnualReport, AnnualStatRow, AttendanceRecord,
    ClassificationAverage, ImprovementStanding, PointsStanding, ReportLimits, ScoreStanding,
    TournamentDetail,
};
pub use export::{
    annual_columns, export_filename, format_table, scoreboard_columns, ExportColumn, ExportRow,
};
pub use handicap::{compute_handicap, HandicapLedger, HandicapOutcome, LedgerPoint};
pub use ingest::{
    plan_ingestion, replay_chain, replay_season, validate_batch, BatchValidation, IngestPlan,
    RejectReason, RejectedRow, ScoreCard, ScoreRow, SeasonSnapshot,
};
pub use ranking::{compare_entries, filter_entries, rank_entries};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ScoringError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("consistency error: {0}")]
    Consistency(String),
    #[error("export error: {0}")]
    Export(String),
}

/// Stable roster identity (the club member number).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    /// Parses a member number, trimming surrounding whitespace.
    ///
    /// # Errors
    /// Returns [`ScoringError::Validation`] when the value is blank.
    pub fn parse(raw: &str) -> Result<Self, ScoringError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScoringError::Validation(
                "member_id MUST NOT be blank".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MemberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct TournamentId(pub i64);

impl Display for TournamentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Some(Self::Male),
            "female" | "f" => Some(Self::Female),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub member_id: MemberId,
    pub display_name: String,
    pub gender: Gender,
    pub classification: String,
}

pub type Roster = BTreeMap<MemberId, Member>;

#[must_use]
pub fn roster_from(members: impl IntoIterator<Item = Member>) -> Roster {
    members
        .into_iter()
        .map(|member| (member.member_id.clone(), member))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tournament {
    pub tournament_id: TournamentId,
    pub name: String,
    pub date: Date,
}

/// One member's result in one tournament. At most one exists per
/// `(tournament_id, member_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreEntry {
    pub tournament_id: TournamentId,
    pub member_id: MemberId,
    pub display_name: String,
    pub gross_score: u32,
    pub previous_handicap: f64,
    pub net_score: f64,
    pub handicap_change: f64,
    pub new_handicap: f64,
    pub rank: u32,
    pub points: u32,
    pub ruleset_version: u32,
}

impl ScoreEntry {
    #[must_use]
    pub fn card(&self) -> ScoreCard {
        ScoreCard {
            tournament_id: self.tournament_id,
            member_id: self.member_id.clone(),
            display_name: self.display_name.clone(),
            gross_score: self.gross_score,
        }
    }
}

/// Handicap and point-table constants applied to every round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScoringRules {
    pub ruleset_version: u32,
    pub handicap_divisor: f64,
    pub handicap_change_cap: f64,
    #[serde(default)]
    pub scratch_baseline: f64,
    pub min_handicap: f64,
    pub max_handicap: f64,
    pub default_handicap: f64,
    pub points_table: Vec<u32>,
}

impl ScoringRules {
    /// The club's shipped ruleset. It plays net scores against a par-72
    /// scratch baseline, while a ruleset document that omits
    /// `scratch_baseline` gets the neutral baseline of 0.
    #[must_use]
    pub fn v1() -> Self {
        Self {
            ruleset_version: 1,
            handicap_divisor: 10.0,
            handicap_change_cap: 2.0,
            scratch_baseline: 72.0,
            min_handicap: 0.0,
            max_handicap: 36.0,
            default_handicap: 18.0,
            points_table: vec![10, 8, 6, 5, 4, 3, 2, 1],
        }
    }

    /// Validates numeric bounds and the point table shape.
    ///
    /// # Errors
    /// Returns [`ScoringError::Configuration`] when a constant is missing,
    /// non-finite, or outside its allowed range.
    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.ruleset_version == 0 {
            return Err(ScoringError::Configuration(
                "ruleset_version MUST be >= 1".to_string(),
            ));
        }

        for (name, value) in [
            ("handicap_divisor", self.handicap_divisor),
            ("handicap_change_cap", self.handicap_change_cap),
            ("scratch_baseline", self.scratch_baseline),
            ("min_handicap", self.min_handicap),
            ("max_handicap", self.max_handicap),
            ("default_handicap", self.default_handicap),
        ] {
            if !value.is_finite() {
                return Err(ScoringError::Configuration(format!(
                    "{name} MUST be a finite number"
                )));
            }
        }

        if self.handicap_divisor <= 0.0 {
            return Err(ScoringError::Configuration(
                "handicap_divisor MUST be > 0".to_string(),
            ));
        }

        if self.handicap_change_cap < 0.0 {
            return Err(ScoringError::Configuration(
                "handicap_change_cap MUST be >= 0".to_string(),
            ));
        }

        if self.min_handicap > self.max_handicap {
            return Err(ScoringError::Configuration(
                "min_handicap cannot exceed max_handicap".to_string(),
            ));
        }

        if !(self.min_handicap..=self.max_handicap).contains(&self.default_handicap) {
            return Err(ScoringError::Configuration(
                "default_handicap MUST be within [min_handicap, max_handicap]".to_string(),
            ));
        }

        if self.points_table.is_empty() {
            return Err(ScoringError::Configuration(
                "points_table MUST contain at least one entry".to_string(),
            ));
        }

        if self.points_table.windows(2).any(|pair| pair[1] > pair[0]) {
            return Err(ScoringError::Configuration(
                "points_table MUST be non-increasing by rank".to_string(),
            ));
        }

        Ok(())
    }

    /// Points for a 1-based rank; ranks past the end of the table earn 0.
    #[must_use]
    pub fn points_for_rank(&self, rank: u32) -> u32 {
        points_from_table(&self.points_table, rank)
    }

    /// Decodes and validates a ruleset from JSON.
    ///
    /// # Errors
    /// Returns [`ScoringError::Configuration`] when JSON decoding fails
    /// or decoded values violate ruleset constraints.
    pub fn from_json(value: &Value) -> Result<Self, ScoringError> {
        let rules: Self = serde_json::from_value(value.clone()).map_err(|err| {
            ScoringError::Configuration(format!("invalid ruleset JSON payload: {err}"))
        })?;
        rules.validate()?;
        Ok(rules)
    }
}

pub(crate) fn points_from_table(points_table: &[u32], rank: u32) -> u32 {
    let Some(index) = rank.checked_sub(1) else {
        return 0;
    };
    usize::try_from(index)
        .ok()
        .and_then(|index| points_table.get(index).copied())
        .unwrap_or(0)
}

/// Parses a calendar date in `YYYY-MM-DD` form.
///
/// # Errors
/// Returns [`ScoringError::Validation`] when the value is not a valid date.
pub fn parse_date(value: &str) -> Result<Date, ScoringError> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|err| ScoringError::Validation(format!("invalid date '{value}': {err}")))
}

/// Formats a date as `YYYY-MM-DD`.
///
/// # Errors
/// Returns [`ScoringError::Validation`] when formatting fails.
pub fn format_date(value: Date) -> Result<String, ScoringError> {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|err| ScoringError::Validation(format!("failed to format date: {err}")))
}

pub(crate) fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.min(max).max(min)
}

pub(crate) fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub(crate) fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
