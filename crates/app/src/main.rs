use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use course_core::model::{AssignmentId, QuestionId, UserId};
use course_core::time::parse_instant;
use course_core::{StatusResult, derive_status};
use services::{AssignmentStatusService, Clock, CloseTrigger, ProgressSessionService, SessionConfig};
use storage::http::HttpConfig;
use storage::repository::Storage;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "app=info,services=info,storage=info";
const DEFAULT_DB_URL: &str = "sqlite://dev.sqlite3";

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidAssignmentId { raw: String },
    InvalidTimestamp { flag: &'static str, raw: String },
    InvalidTicks { raw: String },
    InvalidAnswer { raw: String },
    InvalidUser { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidAssignmentId { raw } => {
                write!(f, "invalid --assignment value: {raw}")
            }
            ArgsError::InvalidTimestamp { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidTicks { raw } => write!(f, "invalid --ticks value: {raw}"),
            ArgsError::InvalidAnswer { raw } => {
                write!(f, "invalid --answer value (expected <question_id>=<text>): {raw}")
            }
            ArgsError::InvalidUser { raw } => write!(f, "invalid user id: {raw:?}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- status --release <ts> --soft <ts> --hard <ts> [--now <ts>]");
    eprintln!("  cargo run -p app -- watch   --assignment <id> [--ticks <n>] [--now <ts>] [backend]");
    eprintln!("  cargo run -p app -- release --assignment <id> [backend]");
    eprintln!(
        "  cargo run -p app -- submit  --assignment <id> --student <id> [--instructor <id>] \
         [--answer <qid>=<text>]... [--resubmit] [backend]"
    );
    eprintln!();
    eprintln!("Backend (first match wins):");
    eprintln!("  --api <base_url>     course REST API (token from COURSE_API_TOKEN)");
    eprintln!("  --db <sqlite_url>    local SQLite database (default {DEFAULT_DB_URL})");
    eprintln!();
    eprintln!("Timestamps are RFC 3339, or naive YYYY-MM-DDTHH:MM:SS read as UTC.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  COURSE_API_URL, COURSE_API_TOKEN, COURSE_DB_URL, COURSE_AUTOSAVE_MS, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    Watch,
    Release,
    Submit,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "status" => Some(Self::Status),
            "watch" => Some(Self::Watch),
            "release" => Some(Self::Release),
            "submit" => Some(Self::Submit),
            _ => None,
        }
    }
}

//
// ─── ARGS ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug)]
enum Backend {
    Api(HttpConfig),
    Sqlite(String),
}

#[derive(Debug, Default)]
struct Args {
    api_url: Option<String>,
    db_url: Option<String>,
    assignment: Option<AssignmentId>,
    now: Option<chrono::DateTime<chrono::Utc>>,
    release: Option<chrono::DateTime<chrono::Utc>>,
    soft: Option<chrono::DateTime<chrono::Utc>>,
    hard: Option<chrono::DateTime<chrono::Utc>>,
    ticks: Option<u64>,
    student: Option<UserId>,
    instructor: Option<UserId>,
    answers: Vec<(QuestionId, String)>,
    resubmit: bool,
}

fn parse_timestamp(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<chrono::DateTime<chrono::Utc>, ArgsError> {
    let value = require_value(args, flag)?;
    parse_instant(&value).map_err(|_| ArgsError::InvalidTimestamp { flag, raw: value })
}

fn parse_user(args: &mut impl Iterator<Item = String>, flag: &'static str) -> Result<UserId, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse::<UserId>()
        .map_err(|_| ArgsError::InvalidUser { raw: value })
}

fn parse_answer(raw: String) -> Result<(QuestionId, String), ArgsError> {
    let parsed = raw
        .split_once('=')
        .and_then(|(id, text)| Some((id.parse::<QuestionId>().ok()?, text.to_owned())));
    parsed.ok_or(ArgsError::InvalidAnswer { raw })
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--api" => parsed.api_url = Some(require_value(args, "--api")?),
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = Some(value);
                }
                "--assignment" => {
                    let value = require_value(args, "--assignment")?;
                    let id = value
                        .parse::<AssignmentId>()
                        .map_err(|_| ArgsError::InvalidAssignmentId { raw: value.clone() })?;
                    parsed.assignment = Some(id);
                }
                "--now" => parsed.now = Some(parse_timestamp(args, "--now")?),
                "--release" => parsed.release = Some(parse_timestamp(args, "--release")?),
                "--soft" => parsed.soft = Some(parse_timestamp(args, "--soft")?),
                "--hard" => parsed.hard = Some(parse_timestamp(args, "--hard")?),
                "--ticks" => {
                    let value = require_value(args, "--ticks")?;
                    let ticks = value
                        .parse::<u64>()
                        .map_err(|_| ArgsError::InvalidTicks { raw: value.clone() })?;
                    parsed.ticks = Some(ticks);
                }
                "--student" => parsed.student = Some(parse_user(args, "--student")?),
                "--instructor" => parsed.instructor = Some(parse_user(args, "--instructor")?),
                "--answer" => parsed
                    .answers
                    .push(parse_answer(require_value(args, "--answer")?)?),
                "--resubmit" => parsed.resubmit = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(parsed)
    }

    fn assignment(&self) -> Result<AssignmentId, ArgsError> {
        self.assignment.ok_or(ArgsError::MissingFlag {
            flag: "--assignment",
        })
    }

    fn clock(&self) -> Clock {
        self.now.map_or_else(Clock::default_clock, Clock::fixed)
    }

    fn backend(&self) -> Backend {
        if let Some(url) = &self.api_url {
            return Backend::Api(with_env_token(HttpConfig::new(url.clone())));
        }
        if let Some(url) = &self.db_url {
            return Backend::Sqlite(normalize_sqlite_url(url.clone()));
        }
        if let Some(config) = HttpConfig::from_env() {
            return Backend::Api(config);
        }
        let db_url = std::env::var("COURSE_DB_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map_or_else(|| DEFAULT_DB_URL.to_owned(), normalize_sqlite_url);
        Backend::Sqlite(db_url)
    }
}

fn with_env_token(config: HttpConfig) -> HttpConfig {
    match std::env::var("COURSE_API_TOKEN") {
        Ok(token) if !token.trim().is_empty() => config.with_token(token),
        _ => config,
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

async fn open_storage(backend: Backend) -> Result<Storage, Box<dyn std::error::Error>> {
    match backend {
        Backend::Api(config) => {
            tracing::info!(base_url = %config.base_url, "using course API backend");
            Ok(Storage::http(config)?)
        }
        Backend::Sqlite(db_url) => {
            tracing::info!(%db_url, "using sqlite backend");
            prepare_sqlite_file(&db_url)?;
            Ok(Storage::sqlite(&db_url).await?)
        }
    }
}

//
// ─── COMMANDS ──────────────────────────────────────────────────────────────────
//

/// Percent is already on a 0..=100 scale.
fn status_line(status: &StatusResult) -> String {
    let percent = status
        .time_remaining_percent
        .map_or_else(|| "-".to_owned(), |p| format!("{p:.0}%"));
    format!(
        "{:<12} {:>12}  {percent}",
        status.badge(),
        status.time_remaining_label
    )
}

fn print_status(status: &StatusResult) {
    println!("{}", status_line(status));
}

fn run_status(args: &Args) {
    let now = args.clock().now();
    let status = derive_status(now, args.release, args.soft, args.hard);
    print_status(&status);
}

async fn run_watch(args: &Args, storage: &Storage) -> Result<(), Box<dyn std::error::Error>> {
    let id = args.assignment()?;
    let mut clock = args.clock();
    let service = AssignmentStatusService::new(clock, Arc::clone(&storage.assignments));
    let (assignment, first) = service.load(id).await?;
    println!("{} ({})", assignment.title(), assignment.id());
    print_status(&first);

    let ticks = args.ticks.unwrap_or(u64::MAX);
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.tick().await;
    for _ in 1..ticks {
        interval.tick().await;
        clock.advance(chrono::Duration::seconds(1));
        print_status(&assignment.status_at(clock.now()));
    }
    Ok(())
}

async fn run_release(args: &Args, storage: &Storage) -> Result<(), Box<dyn std::error::Error>> {
    let id = args.assignment()?;
    let service = AssignmentStatusService::new(args.clock(), Arc::clone(&storage.assignments));
    let (assignment, status) = service.release_now(id).await?;
    println!("released {} ({})", assignment.title(), assignment.id());
    print_status(&status);
    Ok(())
}

async fn run_submit(args: &Args, storage: &Storage) -> Result<(), Box<dyn std::error::Error>> {
    let id = args.assignment()?;
    let student = args
        .student
        .clone()
        .ok_or(ArgsError::MissingFlag { flag: "--student" })?;
    let service = ProgressSessionService::from_storage(SessionConfig::from_env(), storage);
    let mut session = match &args.instructor {
        Some(instructor) => {
            service
                .open_session(id, &student, instructor, args.resubmit)
                .await?
        }
        None => service.open_for_viewer(id, &student, args.resubmit).await?,
    };
    if session.is_instructor_preview() {
        println!("instructor preview; nothing will be saved");
    }
    if session.is_read_only() {
        println!("already submitted; pass --resubmit to submit again");
    }
    for (question_id, text) in &args.answers {
        session.set_answer(*question_id, text.clone());
    }

    match session.close_session(CloseTrigger::ExplicitClose).await {
        Some(record) => {
            let verb = if args.resubmit { "resubmitted" } else { "submitted" };
            let at = record
                .submitted_at
                .map_or_else(|| "-".to_owned(), |at| at.to_rfc3339());
            println!("{verb} {} answers at {at}", record.answers.len());
        }
        None => println!("nothing submitted"),
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    if cmd == Command::Status {
        run_status(&args);
        return Ok(());
    }

    let storage = open_storage(args.backend()).await?;
    match cmd {
        Command::Status => Ok(()),
        Command::Watch => run_watch(&args, &storage).await,
        Command::Release => run_release(&args, &storage).await,
        Command::Submit => run_submit(&args, &storage).await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &[&str]) -> Result<Args, ArgsError> {
        let mut iter = raw.iter().map(|s| (*s).to_owned());
        Args::parse(&mut iter)
    }

    #[test]
    fn parses_assignment_and_answers() {
        let args = parse(&[
            "--assignment",
            "12",
            "--student",
            "s-1",
            "--answer",
            "3=forty two",
            "--answer",
            "4=a=b",
            "--resubmit",
        ])
        .unwrap();
        assert_eq!(args.assignment().unwrap(), AssignmentId::new(12));
        assert_eq!(args.student, Some(UserId::new("s-1")));
        assert_eq!(
            args.answers,
            vec![
                (QuestionId::new(3), "forty two".to_owned()),
                (QuestionId::new(4), "a=b".to_owned()),
            ]
        );
        assert!(args.resubmit);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            parse(&["--assignment", "abc"]),
            Err(ArgsError::InvalidAssignmentId { .. })
        ));
        assert!(matches!(
            parse(&["--now", "yesterday"]),
            Err(ArgsError::InvalidTimestamp { flag: "--now", .. })
        ));
        assert!(matches!(
            parse(&["--answer", "no-equals"]),
            Err(ArgsError::InvalidAnswer { .. })
        ));
        assert!(matches!(parse(&["--ticks"]), Err(ArgsError::MissingValue { .. })));
        assert!(matches!(parse(&["--bogus"]), Err(ArgsError::UnknownArg(_))));
    }

    #[test]
    fn missing_assignment_is_reported() {
        let args = parse(&[]).unwrap();
        assert!(matches!(
            args.assignment(),
            Err(ArgsError::MissingFlag { flag: "--assignment" })
        ));
    }

    #[test]
    fn explicit_flags_pick_the_backend() {
        let api = parse(&["--api", "https://course.test"]).unwrap();
        assert!(matches!(api.backend(), Backend::Api(cfg) if cfg.base_url == "https://course.test"));

        let db = parse(&["--db", "sqlite::memory:"]).unwrap();
        assert!(matches!(db.backend(), Backend::Sqlite(url) if url == "sqlite::memory:"));
    }

    #[test]
    fn status_line_prints_percent_unscaled() {
        let now = parse_instant("2023-11-15T00:00:00Z").unwrap();
        let status = derive_status(
            now,
            parse_instant("2023-11-14T00:00:00Z").ok(),
            parse_instant("2023-11-16T00:00:00Z").ok(),
            parse_instant("2023-11-17T00:00:00Z").ok(),
        );
        let line = status_line(&status);
        assert!(line.starts_with("In Progress"));
        assert!(line.ends_with("  50%"), "{line}");

        let unreleased = derive_status(now, None, None, None);
        assert!(status_line(&unreleased).ends_with("  -"));
    }

    #[test]
    fn relative_sqlite_paths_become_absolute() {
        let url = normalize_sqlite_url("sqlite:data/dev.sqlite3".to_owned());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/dev.sqlite3"));
    }
}
