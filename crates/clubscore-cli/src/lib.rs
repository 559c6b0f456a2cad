//! Command surface for the club scoring engine.
//!
//! Hosts can embed the CLI through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_with_db`] for direct [`Command`] execution against a DB path.
//! - [`run_command`] for execution against an existing [`SqliteScoreStore`].

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clubscore_core::{
    annual_columns, export_filename, filter_entries, filter_stat_rows, format_table, parse_date,
    scoreboard_columns, AnnualReport, Gender, Member, MemberId, ReportLimits, ScoreEntry,
    ScoreRow, ScoringRules, Tournament, TournamentId,
};
use clubscore_store_sqlite::{IngestReport, IngestRun, SqliteScoreStore};
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;

#[derive(Debug, Parser)]
#[command(name = "clubscore")]
#[command(about = "Club tournament scoring and handicap CLI")]
pub struct Cli {
    #[arg(long, default_value = "./clubscore.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Member {
        #[command(subcommand)]
        command: Box<MemberCommand>,
    },
    Tournament {
        #[command(subcommand)]
        command: Box<TournamentCommand>,
    },
    Ruleset {
        #[command(subcommand)]
        command: Box<RulesetCommand>,
    },
    Scores {
        #[command(subcommand)]
        command: Box<ScoresCommand>,
    },
    /// Recompute every handicap chain, rank and point from stored gross scores.
    Rebuild(RebuildArgs),
    Report {
        #[command(subcommand)]
        command: Box<ReportCommand>,
    },
}

#[derive(Debug, Subcommand)]
pub enum MemberCommand {
    Upsert(MemberUpsertArgs),
    /// Import a roster CSV with columns `member_id,display_name,gender,classification`.
    Import(CsvArgs),
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct MemberUpsertArgs {
    #[arg(long)]
    member_id: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    gender: GenderArg,
    #[arg(long, default_value = "")]
    classification: String,
}

#[derive(Debug, Args)]
pub struct CsvArgs {
    #[arg(long)]
    csv: PathBuf,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum TournamentCommand {
    Upsert(TournamentUpsertArgs),
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct TournamentUpsertArgs {
    #[arg(long)]
    tournament_id: i64,
    #[arg(long)]
    name: String,
    /// Calendar date, `YYYY-MM-DD`.
    #[arg(long)]
    date: String,
}

#[derive(Debug, Subcommand)]
pub enum RulesetCommand {
    Show(RulesetShowArgs),
    /// Store a ruleset from a JSON file.
    Set(RulesetSetArgs),
}

#[derive(Debug, Args)]
pub struct RulesetShowArgs {
    #[arg(long)]
    ruleset_version: Option<u32>,
}

#[derive(Debug, Args)]
pub struct RulesetSetArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum ScoresCommand {
    /// Replace a tournament's scores from a CSV with columns `member_id,gross_score`.
    Ingest(ScoresIngestArgs),
    Show(ScoresShowArgs),
    Export(ScoresExportArgs),
    /// List ingestion runs for a tournament, newest first.
    Runs(ScoresRunsArgs),
}

#[derive(Debug, Args)]
pub struct ScoresIngestArgs {
    #[arg(long)]
    tournament_id: i64,
    #[arg(long)]
    csv: PathBuf,
    /// Defaults to the ruleset of the latest stored results.
    #[arg(long)]
    ruleset_version: Option<u32>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ScoresShowArgs {
    #[arg(long)]
    tournament_id: i64,
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ScoresExportArgs {
    #[arg(long)]
    tournament_id: i64,
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct ScoresRunsArgs {
    #[arg(long)]
    tournament_id: i64,
}

#[derive(Debug, Args)]
pub struct RebuildArgs {
    /// Defaults to the ruleset of the latest stored results.
    #[arg(long)]
    ruleset_version: Option<u32>,
}

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    Annual(ReportAnnualArgs),
    Export(ReportExportArgs),
}

#[derive(Debug, Args)]
pub struct ReportAnnualArgs {
    #[arg(long = "tournament-id", required = true, num_args = 1..)]
    tournament_ids: Vec<i64>,
    #[arg(long, default_value_t = 10)]
    top_points: usize,
    #[arg(long, default_value_t = 10)]
    top_scores: usize,
    #[arg(long, default_value_t = 5)]
    top_improvements: usize,
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ReportExportArgs {
    #[arg(long = "tournament-id", required = true, num_args = 1..)]
    tournament_ids: Vec<i64>,
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum GenderArg {
    Male,
    Female,
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when store open/migrate fails or the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    run_with_db(&cli.db, cli.command)
}

/// Executes a parsed command using the provided `SQLite` DB path.
///
/// # Errors
/// Returns an error when store open/migrate fails or the requested command fails.
pub fn run_with_db(db_path: &Path, command: Command) -> Result<()> {
    let mut store = SqliteScoreStore::open(db_path)?;
    store.migrate()?;
    run_command(command, &mut store)
}

/// Executes a parsed command against an existing store handle.
///
/// # Errors
/// Returns an error when input parsing, persistence, ingestion, or
/// aggregation fails.
pub fn run_command(command: Command, store: &mut SqliteScoreStore) -> Result<()> {
    tracing::debug!(?command, "dispatching command");
    match command {
        Command::Member { command } => run_member(*command, store),
        Command::Tournament { command } => run_tournament(*command, store),
        Command::Ruleset { command } => run_ruleset(*command, store),
        Command::Scores { command } => run_scores(*command, store),
        Command::Rebuild(args) => {
            let version = match args.ruleset_version {
                Some(version) => version,
                None => store.active_ruleset_version()?,
            };
            let report = store.rebuild(version)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Report { command } => run_report(*command, store),
    }
}

fn run_member(command: MemberCommand, store: &SqliteScoreStore) -> Result<()> {
    match command {
        MemberCommand::Upsert(args) => {
            let member = Member {
                member_id: parse_member_id(&args.member_id)?,
                display_name: args.name,
                gender: map_gender(args.gender),
                classification: args.classification,
            };
            store.upsert_member(&member)?;
            println!("{}", serde_json::to_string_pretty(&member)?);
            Ok(())
        }
        MemberCommand::Import(args) => {
            let members = read_roster_csv(&args.csv)?;
            for member in &members {
                store.upsert_member(member)?;
            }
            tracing::info!(imported = members.len(), path = %args.csv.display(), "imported roster");
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "imported": members.len() }))?
            );
            Ok(())
        }
        MemberCommand::List(args) => {
            let members = store.list_members()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&members)?);
            } else {
                print_member_table(&members);
            }
            Ok(())
        }
    }
}

fn run_tournament(command: TournamentCommand, store: &SqliteScoreStore) -> Result<()> {
    match command {
        TournamentCommand::Upsert(args) => {
            let tournament = Tournament {
                tournament_id: TournamentId(args.tournament_id),
                name: args.name,
                date: parse_date(&args.date).map_err(|err| anyhow!(err.to_string()))?,
            };
            let rebuild_required = store.upsert_tournament(&tournament)?;
            let payload = json!({
                "tournament": tournament,
                "rebuild_required": rebuild_required,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            if rebuild_required {
                eprintln!("hint=run `clubscore rebuild` to refresh handicap chains after the date change");
            }
            Ok(())
        }
        TournamentCommand::List(args) => {
            let tournaments = store.list_tournaments()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&tournaments)?);
            } else {
                print_tournament_table(&tournaments);
            }
            Ok(())
        }
    }
}

fn run_ruleset(command: RulesetCommand, store: &SqliteScoreStore) -> Result<()> {
    match command {
        RulesetCommand::Show(args) => {
            if let Some(version) = args.ruleset_version {
                let rules = store.get_ruleset(version)?;
                println!("{}", serde_json::to_string_pretty(&rules)?);
            } else {
                let rulesets = store.get_rulesets()?;
                println!("{}", serde_json::to_string_pretty(&rulesets)?);
            }
            Ok(())
        }
        RulesetCommand::Set(args) => {
            let raw = fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read ruleset file {}", args.file.display()))?;
            let value: Value = serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in {}", args.file.display()))?;
            let rules = ScoringRules::from_json(&value).map_err(|err| anyhow!(err.to_string()))?;
            store.upsert_ruleset(&rules)?;
            println!("{}", serde_json::to_string_pretty(&rules)?);
            Ok(())
        }
    }
}

fn run_scores(command: ScoresCommand, store: &mut SqliteScoreStore) -> Result<()> {
    match command {
        ScoresCommand::Ingest(args) => {
            let rows = read_score_csv(&args.csv)?;
            let report =
                store.ingest_scores(TournamentId(args.tournament_id), &rows, args.ruleset_version)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_ingest_report(&report);
            }
            Ok(())
        }
        ScoresCommand::Show(args) => {
            let entries = store.list_entries_for_tournament(TournamentId(args.tournament_id))?;
            let entries = match args.search.as_deref() {
                Some(term) => filter_entries(&entries, term),
                None => entries,
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_scoreboard(&entries);
            }
            Ok(())
        }
        ScoresCommand::Export(args) => {
            let tournament_id = TournamentId(args.tournament_id);
            let tournament = store
                .get_tournament(tournament_id)?
                .ok_or_else(|| anyhow!("tournament {tournament_id} does not exist"))?;
            let entries = store.list_entries_for_tournament(tournament_id)?;
            let bytes = format_table(&entries, &scoreboard_columns())
                .map_err(|err| anyhow!(err.to_string()))?;
            let filename = export_filename(&tournament.name, tournament.date)
                .map_err(|err| anyhow!(err.to_string()))?;
            let path = write_export(&args.out_dir, &filename, &bytes)?;
            print_export_result(&path, entries.len())
        }
        ScoresCommand::Runs(args) => {
            let runs = store.list_ingest_runs(TournamentId(args.tournament_id))?;
            print_ingest_runs(&runs);
            Ok(())
        }
    }
}

fn run_report(command: ReportCommand, store: &SqliteScoreStore) -> Result<()> {
    match command {
        ReportCommand::Annual(args) => {
            let limits = ReportLimits {
                top_points: args.top_points,
                top_scores: args.top_scores,
                top_improvements: args.top_improvements,
            };
            let mut report = store.annual_report(&tournament_ids(&args.tournament_ids), limits)?;
            if let Some(term) = args.search.as_deref() {
                report.rows = filter_stat_rows(&report.rows, term);
            }
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_annual_report(&report);
            }
            Ok(())
        }
        ReportCommand::Export(args) => {
            let report = store.annual_report(
                &tournament_ids(&args.tournament_ids),
                ReportLimits::default(),
            )?;
            let bytes = format_table(&report.rows, &annual_columns())
                .map_err(|err| anyhow!(err.to_string()))?;
            let filename = export_filename("annual_stats", OffsetDateTime::now_utc().date())
                .map_err(|err| anyhow!(err.to_string()))?;
            let path = write_export(&args.out_dir, &filename, &bytes)?;
            print_export_result(&path, report.rows.len())
        }
    }
}

fn tournament_ids(raw: &[i64]) -> Vec<TournamentId> {
    raw.iter().copied().map(TournamentId).collect()
}

fn parse_member_id(raw: &str) -> Result<MemberId> {
    MemberId::parse(raw).map_err(|err| anyhow!(err.to_string()))
}

fn map_gender(value: GenderArg) -> Gender {
    match value {
        GenderArg::Male => Gender::Male,
        GenderArg::Female => Gender::Female,
    }
}

#[derive(Debug, Deserialize)]
struct RosterCsvRow {
    member_id: String,
    display_name: String,
    gender: String,
    #[serde(default)]
    classification: String,
}

fn read_score_csv(path: &Path) -> Result<Vec<ScoreRow>> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open score CSV {}", path.display()))?;
    parse_score_csv(file)
}

/// Parses score rows by header name, keeping gross score cells as written.
///
/// Short rows yield no gross score and rows with extra cells keep every
/// trailing cell, so the ingestor rejects them per row instead of the whole
/// file failing.
fn parse_score_csv<R: Read>(input: R) -> Result<Vec<ScoreRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);
    let headers = reader
        .headers()
        .context("failed to read score CSV header")?
        .clone();
    let member_column = headers
        .iter()
        .position(|header| header == "member_id")
        .ok_or_else(|| anyhow!("score CSV has no member_id column"))?;
    let gross_column = headers.iter().position(|header| header == "gross_score");

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let row_number = index + 1;
        let record = record.with_context(|| format!("invalid score CSV row {row_number}"))?;
        if record.len() != headers.len() {
            tracing::warn!(
                row = row_number,
                cells = record.len(),
                expected = headers.len(),
                "score row does not match the header"
            );
        }
        let gross_score = gross_column.and_then(|column| {
            if record.len() > headers.len() {
                Some(record.iter().skip(column).collect::<Vec<_>>().join(","))
            } else {
                record.get(column).map(str::to_string)
            }
        });
        rows.push(ScoreRow {
            member_id: record.get(member_column).unwrap_or_default().to_string(),
            gross_score,
        });
    }
    Ok(rows)
}

fn read_roster_csv(path: &Path) -> Result<Vec<Member>> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open roster CSV {}", path.display()))?;
    parse_roster_csv(file)
}

fn parse_roster_csv<R: Read>(input: R) -> Result<Vec<Member>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut members = Vec::new();
    for (index, record) in reader.deserialize::<RosterCsvRow>().enumerate() {
        let row_number = index + 1;
        let record = record.with_context(|| format!("invalid roster CSV row {row_number}"))?;
        let gender = Gender::parse(&record.gender).ok_or_else(|| {
            anyhow!("roster row {row_number}: unknown gender '{}'", record.gender)
        })?;
        members.push(Member {
            member_id: MemberId::parse(&record.member_id)
                .map_err(|err| anyhow!("roster row {row_number}: {err}"))?,
            display_name: record.display_name,
            gender,
            classification: record.classification,
        });
    }
    Ok(members)
}

fn write_export(out_dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;
    let path = out_dir.join(filename);
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "wrote export");
    Ok(path)
}

fn print_export_result(path: &Path, rows: usize) -> Result<()> {
    let payload = json!({
        "path": path.display().to_string(),
        "rows": rows,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn print_member_table(members: &[Member]) {
    println!(
        "{:<12} {:<24} {:<7} classification",
        "member_id", "name", "gender"
    );
    println!("{}", "-".repeat(64));
    for member in members {
        println!(
            "{:<12} {:<24} {:<7} {}",
            member.member_id,
            member.display_name,
            member.gender.as_str(),
            member.classification
        );
    }
}

fn print_tournament_table(tournaments: &[Tournament]) {
    println!("{:<6} {:<11} name", "id", "date");
    println!("{}", "-".repeat(48));
    for tournament in tournaments {
        println!(
            "{:<6} {:<11} {}",
            tournament.tournament_id,
            tournament.date.to_string(),
            tournament.name
        );
    }
}

fn print_scoreboard(entries: &[ScoreEntry]) {
    println!(
        "{:<5} {:<12} {:<20} {:>5} {:>6} {:>6} {:>7} {:>6} {:>6}",
        "rank", "member_id", "name", "gross", "prev", "net", "change", "new", "points"
    );
    println!("{}", "-".repeat(86));
    for entry in entries {
        println!(
            "{:<5} {:<12} {:<20} {:>5} {:>6.1} {:>6.1} {:>+7.1} {:>6.1} {:>6}",
            entry.rank,
            entry.member_id,
            entry.display_name,
            entry.gross_score,
            entry.previous_handicap,
            entry.net_score,
            entry.handicap_change,
            entry.new_handicap,
            entry.points
        );
    }
}

fn print_ingest_report(report: &IngestReport) {
    println!(
        "tournament={} batch={} ruleset={} {}",
        report.tournament_id,
        report.batch_id,
        report.ruleset_version,
        report.summary()
    );
    for rejected in &report.rejected {
        println!(
            "rejected row={} member_id={} reason={} ({})",
            rejected.row_number,
            if rejected.row.member_id.is_empty() {
                "-"
            } else {
                rejected.row.member_id.as_str()
            },
            rejected.reason.as_str(),
            rejected.reason
        );
    }
    if !report.recomputed_tournaments.is_empty() {
        let recomputed = report
            .recomputed_tournaments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        println!("recomputed_tournaments={recomputed}");
    }
    if !report.restamped_tournaments.is_empty() {
        let restamped = report
            .restamped_tournaments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "warning: ruleset {} replaced other ruleset results in tournaments={restamped}",
            report.ruleset_version
        );
    }
}

fn print_ingest_runs(runs: &[IngestRun]) {
    println!(
        "{:<26} {:<26} {:<8} {:<9} {:<9} recomputed",
        "batch_id", "recorded_at", "ruleset", "accepted", "rejected"
    );
    println!("{}", "-".repeat(96));
    for run in runs {
        let recomputed = run
            .recomputed_tournaments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<26} {:<26} {:<8} {:<9} {:<9} {}",
            run.batch_id,
            run.recorded_at,
            run.ruleset_version,
            run.accepted_count,
            run.rejected_count,
            if recomputed.is_empty() { "-" } else { recomputed.as_str() }
        );
    }
}

fn print_annual_report(report: &AnnualReport) {
    let selected = report
        .tournament_ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    println!("tournaments={selected}");
    println!(
        "{:<12} {:<20} {:<14} {:>6} {:>9} {:>9} {:>7}",
        "member_id", "name", "classification", "rounds", "avg_gross", "avg_hcp", "points"
    );
    println!("{}", "-".repeat(84));
    for row in &report.rows {
        println!(
            "{:<12} {:<20} {:<14} {:>6} {:>9.2} {:>9.2} {:>7}",
            row.member_id,
            row.display_name,
            row.classification,
            row.participation_count,
            row.avg_gross_score,
            row.avg_handicap,
            row.total_points
        );
    }

    println!();
    println!("top_points:");
    for (position, standing) in report.top_points.iter().enumerate() {
        println!(
            "  {:>2}. {} ({}) points={}",
            position + 1,
            standing.display_name,
            standing.member_id,
            standing.total_points
        );
    }
    println!("top_scores:");
    for (position, standing) in report.top_scores.iter().enumerate() {
        println!(
            "  {:>2}. {} ({}) avg_gross={:.2}",
            position + 1,
            standing.display_name,
            standing.member_id,
            standing.avg_gross_score
        );
    }
    println!("top_improvements:");
    for (position, standing) in report.top_improvements.iter().enumerate() {
        println!(
            "  {:>2}. {} ({}) {:.1} -> {:.1} improvement={:.2}",
            position + 1,
            standing.display_name,
            standing.member_id,
            standing.initial_handicap,
            standing.final_handicap,
            standing.improvement
        );
    }
    println!("perfect_attendance:");
    for record in &report.perfect_attendance {
        println!("  {} ({})", record.display_name, record.member_id);
    }
}
