#![allow(clippy::missing_errors_doc)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clubscore_core::{
    annual_report, format_date, parse_date, plan_ingestion, replay_season, roster_from,
    AnnualReport, Gender, Member, MemberId, RejectedRow, ReportLimits, Roster, ScoreCard,
    ScoreEntry, ScoreRow, ScoringError, ScoringRules, SeasonSnapshot, Tournament, TournamentId,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use ulid::Ulid;

const SCORING_MIGRATION_VERSION: i64 = 1;

const SCHEMA_SCORING_V1: &str = r"
CREATE TABLE IF NOT EXISTS scoring_rulesets (
  ruleset_version INTEGER PRIMARY KEY,
  ruleset_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS members (
  member_id TEXT PRIMARY KEY CHECK (length(trim(member_id)) > 0),
  display_name TEXT NOT NULL,
  gender TEXT NOT NULL CHECK (gender IN ('male', 'female')),
  classification TEXT NOT NULL DEFAULT '',
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tournaments (
  tournament_id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  date TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tournaments_date
  ON tournaments(date, tournament_id);

CREATE TABLE IF NOT EXISTS score_entries (
  tournament_id INTEGER NOT NULL,
  member_id TEXT NOT NULL,
  display_name TEXT NOT NULL,
  gross_score INTEGER NOT NULL CHECK (gross_score > 0),
  previous_handicap REAL NOT NULL,
  net_score REAL NOT NULL,
  handicap_change REAL NOT NULL,
  new_handicap REAL NOT NULL,
  rank INTEGER NOT NULL CHECK (rank >= 1),
  points INTEGER NOT NULL CHECK (points >= 0),
  ruleset_version INTEGER NOT NULL,
  PRIMARY KEY (tournament_id, member_id),
  UNIQUE (tournament_id, rank),
  FOREIGN KEY (tournament_id) REFERENCES tournaments(tournament_id),
  FOREIGN KEY (member_id) REFERENCES members(member_id),
  FOREIGN KEY (ruleset_version) REFERENCES scoring_rulesets(ruleset_version)
);

CREATE INDEX IF NOT EXISTS idx_score_entries_member
  ON score_entries(member_id, tournament_id);

CREATE TABLE IF NOT EXISTS ingest_runs (
  run_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  batch_id TEXT NOT NULL UNIQUE,
  tournament_id INTEGER NOT NULL,
  ruleset_version INTEGER NOT NULL,
  accepted_count INTEGER NOT NULL CHECK (accepted_count >= 0),
  rejected_count INTEGER NOT NULL CHECK (rejected_count >= 0),
  recomputed_json TEXT NOT NULL DEFAULT '[]',
  rejected_json TEXT NOT NULL DEFAULT '[]',
  recorded_at TEXT NOT NULL,
  FOREIGN KEY (tournament_id) REFERENCES tournaments(tournament_id),
  FOREIGN KEY (ruleset_version) REFERENCES scoring_rulesets(ruleset_version)
);

CREATE INDEX IF NOT EXISTS idx_ingest_runs_tournament
  ON ingest_runs(tournament_id, run_seq);
";

const SELECT_ENTRY_COLUMNS: &str = "SELECT
    e.tournament_id, e.member_id, e.display_name, e.gross_score,
    e.previous_handicap, e.net_score, e.handicap_change, e.new_handicap,
    e.rank, e.points, e.ruleset_version
 FROM score_entries e
 JOIN tournaments t ON t.tournament_id = e.tournament_id";

pub struct SqliteScoreStore {
    conn: Connection,
}

/// Outcome of one ingestion, as reported to the uploader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestReport {
    pub batch_id: Ulid,
    pub tournament_id: TournamentId,
    pub ruleset_version: u32,
    pub accepted: Vec<ScoreEntry>,
    pub rejected: Vec<RejectedRow>,
    pub recomputed_tournaments: Vec<TournamentId>,
    /// Replaced tournaments whose stored results were computed under a
    /// different ruleset version than this ingestion applied.
    pub restamped_tournaments: Vec<TournamentId>,
    pub recorded_at: String,
}

impl IngestReport {
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} accepted, {} rejected",
            self.accepted.len(),
            self.rejected.len()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestRun {
    pub batch_id: Ulid,
    pub tournament_id: TournamentId,
    pub ruleset_version: u32,
    pub accepted_count: usize,
    pub rejected_count: usize,
    pub recomputed_tournaments: Vec<TournamentId>,
    pub rejected: Vec<RejectedRow>,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebuildReport {
    pub ruleset_version: u32,
    pub tournaments: usize,
    pub entries: usize,
}

impl SqliteScoreStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_SCORING_V1)
            .context("failed to apply scoring schema")?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![SCORING_MIGRATION_VERSION, timestamp_now()?],
            )
            .context("failed to register scoring schema migration")?;

        let seeded: Option<i64> = self
            .conn
            .query_row(
                "SELECT ruleset_version FROM scoring_rulesets WHERE ruleset_version = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("failed to check for the v1 ruleset")?;
        if seeded.is_none() {
            self.upsert_ruleset(&ScoringRules::v1())?;
        }

        Ok(())
    }

    pub fn upsert_ruleset(&self, rules: &ScoringRules) -> Result<()> {
        rules
            .validate()
            .map_err(|err| anyhow!("invalid ruleset configuration: {err}"))?;

        let payload = serde_json::to_string(rules).context("failed to serialize ruleset")?;
        self.conn
            .execute(
                "INSERT INTO scoring_rulesets(ruleset_version, ruleset_json, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(ruleset_version) DO UPDATE SET
                   ruleset_json = excluded.ruleset_json,
                   created_at = excluded.created_at",
                params![i64::from(rules.ruleset_version), payload, timestamp_now()?],
            )
            .context("failed to upsert ruleset")?;

        tracing::info!(ruleset_version = rules.ruleset_version, "stored scoring ruleset");
        Ok(())
    }

    pub fn get_rulesets(&self) -> Result<BTreeMap<u32, ScoringRules>> {
        let mut stmt = self.conn.prepare(
            "SELECT ruleset_version, ruleset_json FROM scoring_rulesets ORDER BY ruleset_version ASC",
        )?;

        let mut rows = stmt.query([])?;
        let mut map = BTreeMap::new();

        while let Some(row) = rows.next()? {
            let version_i64: i64 = row.get(0)?;
            let version = u32::try_from(version_i64)
                .with_context(|| format!("invalid ruleset_version: {version_i64}"))?;
            let json: String = row.get(1)?;
            map.insert(version, decode_ruleset(version, &json)?);
        }

        Ok(map)
    }

    pub fn get_ruleset(&self, ruleset_version: u32) -> Result<ScoringRules> {
        load_ruleset(&self.conn, ruleset_version)
    }

    pub fn upsert_member(&self, member: &Member) -> Result<()> {
        if member.display_name.trim().is_empty() {
            return Err(anyhow!(
                "member {} MUST have a display name",
                member.member_id
            ));
        }

        self.conn
            .execute(
                "INSERT INTO members(member_id, display_name, gender, classification, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(member_id) DO UPDATE SET
                   display_name = excluded.display_name,
                   gender = excluded.gender,
                   classification = excluded.classification,
                   updated_at = excluded.updated_at",
                params![
                    member.member_id.as_str(),
                    member.display_name.trim(),
                    member.gender.as_str(),
                    member.classification.trim(),
                    timestamp_now()?,
                ],
            )
            .with_context(|| format!("failed to upsert member {}", member.member_id))?;

        Ok(())
    }

    pub fn list_members(&self) -> Result<Vec<Member>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id, display_name, gender, classification
             FROM members
             ORDER BY member_id ASC",
        )?;
        let rows = stmt.query_map([], parse_member_row)?;
        collect_rows(rows)
    }

    pub fn roster(&self) -> Result<Roster> {
        load_roster(&self.conn)
    }

    /// Inserts or updates a tournament record.
    ///
    /// Returns `true` when a tournament that already has scores moved to a
    /// different date. Its handicap chain stays stale until [`Self::rebuild`]
    /// runs.
    pub fn upsert_tournament(&self, tournament: &Tournament) -> Result<bool> {
        if tournament.name.trim().is_empty() {
            return Err(anyhow!(
                "tournament {} MUST have a name",
                tournament.tournament_id
            ));
        }

        let date = format_date(tournament.date).map_err(|err| anyhow!(err.to_string()))?;
        let previous_date: Option<String> = self
            .conn
            .query_row(
                "SELECT date FROM tournaments WHERE tournament_id = ?1",
                params![tournament.tournament_id.0],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read existing tournament")?;

        self.conn
            .execute(
                "INSERT INTO tournaments(tournament_id, name, date, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(tournament_id) DO UPDATE SET
                   name = excluded.name,
                   date = excluded.date,
                   updated_at = excluded.updated_at",
                params![
                    tournament.tournament_id.0,
                    tournament.name.trim(),
                    date,
                    timestamp_now()?,
                ],
            )
            .with_context(|| format!("failed to upsert tournament {}", tournament.tournament_id))?;

        let moved = previous_date.is_some_and(|previous| previous != date);
        if !moved {
            return Ok(false);
        }

        let scored: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM score_entries WHERE tournament_id = ?1",
                params![tournament.tournament_id.0],
                |row| row.get(0),
            )
            .context("failed to count tournament scores")?;
        if scored > 0 {
            tracing::warn!(
                tournament_id = %tournament.tournament_id,
                new_date = %date,
                "tournament with scores changed date; handicap chain needs a rebuild"
            );
        }
        Ok(scored > 0)
    }

    pub fn get_tournament(&self, tournament_id: TournamentId) -> Result<Option<Tournament>> {
        self.conn
            .query_row(
                "SELECT tournament_id, name, date FROM tournaments WHERE tournament_id = ?1",
                params![tournament_id.0],
                parse_tournament_row,
            )
            .optional()
            .with_context(|| format!("failed to read tournament {tournament_id}"))
    }

    pub fn list_tournaments(&self) -> Result<Vec<Tournament>> {
        load_tournaments(&self.conn)
    }

    /// Scoreboard for one tournament in rank order.
    pub fn list_entries_for_tournament(
        &self,
        tournament_id: TournamentId,
    ) -> Result<Vec<ScoreEntry>> {
        if self.get_tournament(tournament_id)?.is_none() {
            return Err(anyhow!("tournament {tournament_id} does not exist"));
        }

        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_ENTRY_COLUMNS}
             WHERE e.tournament_id = ?1
             ORDER BY e.rank ASC"
        ))?;
        let rows = stmt.query_map(params![tournament_id.0], parse_entry_row)?;
        collect_rows(rows)
    }

    pub fn list_all_entries(&self) -> Result<Vec<ScoreEntry>> {
        load_entries(&self.conn)
    }

    /// Replaces the scores of `tournament_id` with `rows` and replays every
    /// tournament dated on or after it, in one immediate transaction.
    ///
    /// With `ruleset_version` unset the active ruleset is applied (see
    /// [`Self::active_ruleset_version`]). Rejected rows are reported, not
    /// raised. An unknown tournament or ruleset aborts the ingestion without
    /// writing anything.
    pub fn ingest_scores(
        &mut self,
        tournament_id: TournamentId,
        rows: &[ScoreRow],
        ruleset_version: Option<u32>,
    ) -> Result<IngestReport> {
        let started = Instant::now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start ingest transaction")?;

        let ruleset_version = match ruleset_version {
            Some(version) => version,
            None => resolve_active_ruleset(&tx)?,
        };
        tracing::info!(
            tournament_id = %tournament_id,
            rows = rows.len(),
            ruleset_version,
            "ingesting score batch"
        );

        let rules = load_ruleset(&tx, ruleset_version)?;
        let snapshot = SeasonSnapshot {
            tournaments: load_tournaments(&tx)?,
            entries: load_entries(&tx)?,
        };
        let roster = load_roster(&tx)?;

        let plan = plan_ingestion(tournament_id, rows, &roster, &snapshot, &rules)
            .map_err(|err| anyhow!("failed to ingest tournament {tournament_id}: {err}"))?;

        let replaced_ids: BTreeSet<TournamentId> = plan.replaced_tournaments().into_iter().collect();
        let restamped_tournaments: Vec<TournamentId> = snapshot
            .entries
            .iter()
            .filter(|entry| {
                replaced_ids.contains(&entry.tournament_id)
                    && entry.ruleset_version != ruleset_version
            })
            .map(|entry| entry.tournament_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !restamped_tournaments.is_empty() {
            tracing::warn!(
                tournament_id = %tournament_id,
                ruleset_version,
                restamped = ?restamped_tournaments,
                "ingestion re-scores stored results under a different ruleset"
            );
        }

        for replaced in plan.replaced_tournaments() {
            tx.execute(
                "DELETE FROM score_entries WHERE tournament_id = ?1",
                params![replaced.0],
            )
            .with_context(|| format!("failed to clear scores for tournament {replaced}"))?;
        }
        insert_entries(&tx, &plan.replacement)?;

        for rejected in &plan.rejected {
            tracing::warn!(
                tournament_id = %tournament_id,
                row_number = rejected.row_number,
                member_id = %rejected.row.member_id,
                reason = rejected.reason.as_str(),
                "rejected score row"
            );
        }

        let batch_id = Ulid::new();
        let recorded_at = timestamp_now()?;
        tx.execute(
            "INSERT INTO ingest_runs(
                batch_id, tournament_id, ruleset_version, accepted_count,
                rejected_count, recomputed_json, rejected_json, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                batch_id.to_string(),
                tournament_id.0,
                i64::from(ruleset_version),
                i64::try_from(plan.accepted.len()).context("accepted count overflow")?,
                i64::try_from(plan.rejected.len()).context("rejected count overflow")?,
                serde_json::to_string(&plan.recomputed_tournaments)
                    .context("failed to serialize recomputed tournaments")?,
                serde_json::to_string(&plan.rejected)
                    .context("failed to serialize rejected rows")?,
                recorded_at,
            ],
        )
        .context("failed to record ingest run")?;

        tx.commit().context("failed to commit ingest transaction")?;

        if !plan.recomputed_tournaments.is_empty() {
            tracing::info!(
                tournament_id = %tournament_id,
                recomputed = ?plan.recomputed_tournaments,
                "cascaded handicap recompute into later tournaments"
            );
        }
        tracing::info!(
            tournament_id = %tournament_id,
            %batch_id,
            accepted = plan.accepted.len(),
            rejected = plan.rejected.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "score batch ingested"
        );

        Ok(IngestReport {
            batch_id,
            tournament_id,
            ruleset_version,
            accepted: plan.accepted,
            rejected: plan.rejected,
            recomputed_tournaments: plan.recomputed_tournaments,
            restamped_tournaments,
            recorded_at,
        })
    }

    /// Ruleset version a plain ingestion applies: the version stamped on the
    /// latest stored results (by tournament date, then id), or the newest
    /// stored ruleset when nothing has been scored yet.
    pub fn active_ruleset_version(&self) -> Result<u32> {
        resolve_active_ruleset(&self.conn)
    }

    /// Recomputes every stored entry from its gross score in date order.
    pub fn rebuild(&mut self, ruleset_version: u32) -> Result<RebuildReport> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start rebuild transaction")?;

        let rules = load_ruleset(&tx, ruleset_version)?;
        let tournaments = load_tournaments(&tx)?;
        let roster = load_roster(&tx)?;
        let cards: Vec<ScoreCard> = load_entries(&tx)?
            .iter()
            .map(|entry| entry.card().with_roster_name(&roster))
            .collect();
        let replayed = replay_season(&tournaments, &cards, &rules)
            .map_err(|err| anyhow!("failed to rebuild handicap chain: {err}"))?;

        tx.execute("DELETE FROM score_entries", [])
            .context("failed to clear score entries")?;
        insert_entries(&tx, &replayed)?;
        tx.commit().context("failed to commit rebuild transaction")?;

        let report = RebuildReport {
            ruleset_version,
            tournaments: tournaments.len(),
            entries: replayed.len(),
        };
        tracing::info!(
            ruleset_version,
            tournaments = report.tournaments,
            entries = report.entries,
            "rebuilt handicap chain"
        );
        Ok(report)
    }

    /// Annual statistics over `selection`, read from one snapshot.
    pub fn annual_report(
        &self,
        selection: &[TournamentId],
        limits: ReportLimits,
    ) -> Result<AnnualReport> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("failed to start report snapshot")?;
        let tournaments = load_tournaments(&tx)?;
        let entries = load_entries(&tx)?;
        let roster = load_roster(&tx)?;
        tx.commit().context("failed to close report snapshot")?;

        annual_report(selection, &tournaments, &entries, &roster, limits)
            .map_err(|err| anyhow!("failed to build annual report: {err}"))
    }

    /// Ingest audit log for a tournament, newest first.
    pub fn list_ingest_runs(&self, tournament_id: TournamentId) -> Result<Vec<IngestRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT batch_id, tournament_id, ruleset_version, accepted_count,
                    rejected_count, recomputed_json, rejected_json, recorded_at
             FROM ingest_runs
             WHERE tournament_id = ?1
             ORDER BY run_seq DESC",
        )?;
        let rows = stmt.query_map(params![tournament_id.0], parse_ingest_run_row)?;
        collect_rows(rows)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn decode_ruleset(version: u32, json: &str) -> Result<ScoringRules> {
    let value: Value = serde_json::from_str(json).context("invalid stored ruleset JSON")?;
    ScoringRules::from_json(&value).map_err(|err| anyhow!("failed to parse ruleset {version}: {err}"))
}

fn resolve_active_ruleset(conn: &Connection) -> Result<u32> {
    let latest: Option<i64> = conn
        .query_row(
            "SELECT e.ruleset_version
             FROM score_entries e
             JOIN tournaments t ON t.tournament_id = e.tournament_id
             ORDER BY t.date DESC, t.tournament_id DESC
             LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read ruleset of latest results")?;
    let version = match latest {
        Some(version) => version,
        None => conn
            .query_row(
                "SELECT MAX(ruleset_version) FROM scoring_rulesets",
                [],
                |row| row.get::<_, Option<i64>>(0),
            )
            .context("failed to read newest ruleset")?
            .ok_or_else(|| anyhow!("no scoring ruleset is stored"))?,
    };
    u32::try_from(version).with_context(|| format!("invalid ruleset_version: {version}"))
}

fn load_ruleset(conn: &Connection, ruleset_version: u32) -> Result<ScoringRules> {
    let json: Option<String> = conn
        .query_row(
            "SELECT ruleset_json FROM scoring_rulesets WHERE ruleset_version = ?1",
            params![i64::from(ruleset_version)],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to read ruleset {ruleset_version}"))?;
    let json = json.ok_or_else(|| {
        anyhow!("missing ruleset_version {ruleset_version} in scoring_rulesets")
    })?;
    decode_ruleset(ruleset_version, &json)
}

fn load_tournaments(conn: &Connection) -> Result<Vec<Tournament>> {
    let mut stmt = conn.prepare(
        "SELECT tournament_id, name, date
         FROM tournaments
         ORDER BY date ASC, tournament_id ASC",
    )?;
    let rows = stmt.query_map([], parse_tournament_row)?;
    collect_rows(rows)
}

fn load_entries(conn: &Connection) -> Result<Vec<ScoreEntry>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_ENTRY_COLUMNS}
         ORDER BY t.date ASC, e.tournament_id ASC, e.rank ASC"
    ))?;
    let rows = stmt.query_map([], parse_entry_row)?;
    collect_rows(rows)
}

fn load_roster(conn: &Connection) -> Result<Roster> {
    let mut stmt = conn.prepare(
        "SELECT member_id, display_name, gender, classification FROM members",
    )?;
    let rows = stmt.query_map([], parse_member_row)?;
    Ok(roster_from(collect_rows(rows)?))
}

fn insert_entries(conn: &Connection, entries: &[ScoreEntry]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO score_entries(
            tournament_id, member_id, display_name, gross_score,
            previous_handicap, net_score, handicap_change, new_handicap,
            rank, points, ruleset_version
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for entry in entries {
        stmt.execute(params![
            entry.tournament_id.0,
            entry.member_id.as_str(),
            entry.display_name,
            i64::from(entry.gross_score),
            entry.previous_handicap,
            entry.net_score,
            entry.handicap_change,
            entry.new_handicap,
            i64::from(entry.rank),
            i64::from(entry.points),
            i64::from(entry.ruleset_version),
        ])
        .with_context(|| {
            format!(
                "failed to store score for member {} in tournament {}",
                entry.member_id, entry.tournament_id
            )
        })?;
    }
    Ok(())
}

fn parse_member_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    let gender_raw: String = row.get(2)?;
    let gender = Gender::parse(&gender_raw).ok_or_else(|| {
        to_sql_error(ScoringError::Validation(format!(
            "unknown gender: {gender_raw}"
        )))
    })?;

    Ok(Member {
        member_id: MemberId(row.get(0)?),
        display_name: row.get(1)?,
        gender,
        classification: row.get(3)?,
    })
}

fn parse_tournament_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tournament> {
    let date_raw: String = row.get(2)?;
    Ok(Tournament {
        tournament_id: TournamentId(row.get(0)?),
        name: row.get(1)?,
        date: parse_date(&date_raw).map_err(to_sql_error)?,
    })
}

fn parse_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScoreEntry> {
    Ok(ScoreEntry {
        tournament_id: TournamentId(row.get(0)?),
        member_id: MemberId(row.get(1)?),
        display_name: row.get(2)?,
        gross_score: get_u32(row, 3)?,
        previous_handicap: row.get(4)?,
        net_score: row.get(5)?,
        handicap_change: row.get(6)?,
        new_handicap: row.get(7)?,
        rank: get_u32(row, 8)?,
        points: get_u32(row, 9)?,
        ruleset_version: get_u32(row, 10)?,
    })
}

fn parse_ingest_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngestRun> {
    let batch_raw: String = row.get(0)?;
    let batch_id = Ulid::from_string(&batch_raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err)))?;
    let recomputed_json: String = row.get(5)?;
    let rejected_json: String = row.get(6)?;

    Ok(IngestRun {
        batch_id,
        tournament_id: TournamentId(row.get(1)?),
        ruleset_version: get_u32(row, 2)?,
        accepted_count: get_usize(row, 3)?,
        rejected_count: get_usize(row, 4)?,
        recomputed_tournaments: serde_json::from_str(&recomputed_json).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(err))
        })?,
        rejected: serde_json::from_str(&rejected_json).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(err))
        })?,
        recorded_at: row.get(7)?,
    })
}

fn get_u32(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<u32> {
    let raw: i64 = row.get(index)?;
    u32::try_from(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Integer, Box::new(err)))
}

fn get_usize(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<usize> {
    let raw: i64 = row.get(index)?;
    usize::try_from(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Integer, Box::new(err)))
}

fn timestamp_now() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format timestamp")
}

#[allow(clippy::needless_pass_by_value)]
fn to_sql_error(err: ScoringError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
