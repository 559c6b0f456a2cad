use serde::{Deserialize, Serialize};
use time::Date;

use crate::{format_date, AnnualStatRow, ScoreEntry, ScoringError};

/// One output column: the row field it reads and its header label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportColumn {
    pub key: String,
    pub label: String,
}

impl ExportColumn {
    #[must_use]
    pub fn new(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
        }
    }
}

/// A row type the formatter can render.
pub trait ExportRow {
    /// Column keys this row type understands.
    const KEYS: &'static [&'static str];

    /// Rendered cell for `key`; only called with keys from [`Self::KEYS`].
    fn cell(&self, key: &str) -> String;
}

impl ExportRow for ScoreEntry {
    const KEYS: &'static [&'static str] = &[
        "rank",
        "member_id",
        "display_name",
        "gross_score",
        "previous_handicap",
        "net_score",
        "handicap_change",
        "new_handicap",
        "points",
        "tournament_id",
        "ruleset_version",
    ];

    fn cell(&self, key: &str) -> String {
        match key {
            "rank" => self.rank.to_string(),
            "member_id" => self.member_id.to_string(),
            "display_name" => self.display_name.clone(),
            "gross_score" => self.gross_score.to_string(),
            "previous_handicap" => format!("{:.1}", self.previous_handicap),
            "net_score" => format!("{:.1}", self.net_score),
            "handicap_change" => format!("{:.1}", self.handicap_change),
            "new_handicap" => format!("{:.1}", self.new_handicap),
            "points" => self.points.to_string(),
            "tournament_id" => self.tournament_id.to_string(),
            "ruleset_version" => self.ruleset_version.to_string(),
            _ => String::new(),
        }
    }
}

impl ExportRow for AnnualStatRow {
    const KEYS: &'static [&'static str] = &[
        "member_id",
        "display_name",
        "gender",
        "classification",
        "avg_gross_score",
        "participation_count",
        "avg_handicap",
        "total_points",
        "improvement",
    ];

    fn cell(&self, key: &str) -> String {
        match key {
            "member_id" => self.member_id.to_string(),
            "display_name" => self.display_name.clone(),
            "gender" => self.gender.as_str().to_string(),
            "classification" => self.classification.clone(),
            "avg_gross_score" => format!("{:.2}", self.avg_gross_score),
            "participation_count" => self.participation_count.to_string(),
            "avg_handicap" => format!("{:.2}", self.avg_handicap),
            "total_points" => self.total_points.to_string(),
            "improvement" => self
                .improvement()
                .map(|(_, _, improvement)| format!("{improvement:.2}"))
                .unwrap_or_default(),
            _ => String::new(),
        }
    }
}

#[must_use]
pub fn scoreboard_columns() -> Vec<ExportColumn> {
    vec![
        ExportColumn::new("rank", "Rank"),
        ExportColumn::new("member_id", "Member No."),
        ExportColumn::new("display_name", "Name"),
        ExportColumn::new("gross_score", "Gross"),
        ExportColumn::new("previous_handicap", "Previous Handicap"),
        ExportColumn::new("net_score", "Net"),
        ExportColumn::new("handicap_change", "Handicap Change"),
        ExportColumn::new("new_handicap", "New Handicap"),
        ExportColumn::new("points", "Points"),
    ]
}

#[must_use]
pub fn annual_columns() -> Vec<ExportColumn> {
    vec![
        ExportColumn::new("member_id", "Member No."),
        ExportColumn::new("display_name", "Name"),
        ExportColumn::new("gender", "Gender"),
        ExportColumn::new("classification", "Classification"),
        ExportColumn::new("participation_count", "Rounds"),
        ExportColumn::new("avg_gross_score", "Average Gross"),
        ExportColumn::new("avg_handicap", "Average Handicap"),
        ExportColumn::new("total_points", "Total Points"),
    ]
}

/// Renders rows as CSV with a header line of column labels.
///
/// # Errors
/// Returns [`ScoringError::Configuration`] for an empty column list or a
/// key the row type does not know, and [`ScoringError::Export`] when the
/// CSV writer fails.
pub fn format_table<R: ExportRow>(
    rows: &[R],
    columns: &[ExportColumn],
) -> Result<Vec<u8>, ScoringError> {
    if columns.is_empty() {
        return Err(ScoringError::Configuration(
            "export requires at least one column".to_string(),
        ));
    }
    if let Some(column) = columns
        .iter()
        .find(|column| !R::KEYS.contains(&column.key.as_str()))
    {
        return Err(ScoringError::Configuration(format!(
            "unknown export column '{}'",
            column.key
        )));
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(columns.iter().map(|column| column.label.as_str()))
        .map_err(|err| ScoringError::Export(err.to_string()))?;
    for row in rows {
        writer
            .write_record(columns.iter().map(|column| row.cell(&column.key)))
            .map_err(|err| ScoringError::Export(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| ScoringError::Export(err.to_string()))
}

/// `<context>_<YYYY-MM-DD>.csv`, keeping ASCII letters, digits, `-` and `_`
/// from the context and mapping whitespace to `_`.
///
/// # Errors
/// Returns [`ScoringError::Validation`] when the date cannot be formatted.
pub fn export_filename(context: &str, date: Date) -> Result<String, ScoringError> {
    let mut sanitized: String = context
        .trim()
        .chars()
        .filter_map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                Some(ch)
            } else if ch.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .collect();
    if sanitized.is_empty() {
        sanitized.push_str("export");
    }
    Ok(format!("{sanitized}_{}.csv", format_date(date)?))
}
