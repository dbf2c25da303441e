use std::fmt;

use chrono::{DateTime, Duration, Utc};
use course_core::model::{Assignment, AssignmentId, CourseId, Question, QuestionId};
use course_core::time::parse_instant;
use storage::sqlite::SqliteRepository;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    assignment_id: AssignmentId,
    title: String,
    questions: u32,
    released: bool,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidAssignmentId { raw: String },
    InvalidQuestions { raw: String },
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
    QuestionIdOverflow { assignment_id: AssignmentId },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidAssignmentId { raw } => {
                write!(f, "invalid --assignment-id value: {raw}")
            }
            ArgsError::InvalidQuestions { raw } => write!(f, "invalid --questions value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
            ArgsError::QuestionIdOverflow { assignment_id } => write!(
                f,
                "--assignment-id {assignment_id} is too large to derive question ids"
            ),
        }
    }
}

impl std::error::Error for ArgsError {}

/// Question ids are `assignment_id * 100 + 1 ..= + questions`.
fn question_id_base(assignment_id: AssignmentId, questions: u32) -> Result<u64, ArgsError> {
    assignment_id
        .value()
        .checked_mul(100)
        .filter(|base| base.checked_add(u64::from(questions)).is_some())
        .ok_or(ArgsError::QuestionIdOverflow { assignment_id })
}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("COURSE_DB_URL").unwrap_or_else(|_| "sqlite:dev.sqlite3?mode=rwc".into());
        let mut assignment_id = std::env::var("COURSE_ASSIGNMENT_ID")
            .ok()
            .and_then(|value| value.parse::<AssignmentId>().ok())
            .unwrap_or_else(|| AssignmentId::new(1));
        let mut title = "Week 1 Practice".to_string();
        let mut questions = 3;
        let mut released = true;
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--assignment-id" => {
                    let value = require_value(&mut args, "--assignment-id")?;
                    assignment_id = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidAssignmentId { raw: value.clone() })?;
                }
                "--title" => {
                    title = require_value(&mut args, "--title")?;
                }
                "--questions" => {
                    let value = require_value(&mut args, "--questions")?;
                    questions = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidQuestions { raw: value.clone() })?;
                }
                "--unreleased" => released = false,
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    now = Some(
                        parse_instant(&value)
                            .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?,
                    );
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            assignment_id,
            title,
            questions,
            released,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:dev.sqlite3?mode=rwc)");
    eprintln!("  --assignment-id <id>      Assignment id to upsert (default: 1)");
    eprintln!("  --title <text>            Assignment title");
    eprintln!("  --questions <n>           Number of sample questions (default: 3)");
    eprintln!("  --unreleased              Leave the release date unset");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  COURSE_DB_URL, COURSE_ASSIGNMENT_ID");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let repo = SqliteRepository::connect(&args.db_url).await?;
    repo.migrate().await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let samples = [
        "What does a for loop iterate over?",
        "Explain the difference between a list and a tuple.",
        "Which keyword exits a loop early?",
        "What is the output of 3 // 2?",
    ];
    let base = question_id_base(args.assignment_id, args.questions)?;
    let mut question_ids = Vec::new();
    for i in 0..args.questions {
        let id = QuestionId::new(base + u64::from(i) + 1);
        let text = samples[(i as usize) % samples.len()];
        repo.upsert_question(&Question::new(id, Some(format!("Question {}", i + 1)), text))
            .await?;
        question_ids.push(id);
    }

    let release_at = args.released.then(|| now - Duration::days(1));
    let assignment = Assignment::new(args.assignment_id, args.title.clone())
        .with_course(CourseId::new(1))
        .with_schedule(
            release_at,
            Some(now + Duration::days(3)),
            Some(now + Duration::days(5)),
        )
        .with_questions(question_ids);
    repo.upsert_assignment(&assignment).await?;

    println!(
        "Seeded assignment {} ({}) with {} questions into {}",
        args.assignment_id, args.title, args.questions, args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
