mod api;
mod config;
mod db;
mod exercise;
mod parser;
mod query;
mod scraper;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::parser::Segment;
use crate::scraper::{SearchParams, SentenceScraper};

#[derive(Parser)]
#[command(name = "gapfill", about = "Fill-in-the-blank exercises from Tatoeba sentences")]
struct Cli {
    /// SQLite database path (overrides GAPFILL_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Search Tatoeba and print the marked-up sentences
    Scrape {
        /// Search phrases, one request each
        #[arg(required = true)]
        queries: Vec<String>,
        /// Search parameter replacing the default set (repeatable, e.g. -P from=deu)
        #[arg(short = 'P', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Store an exercise from marked-up sentences, e.g. "I <am> a student"
    Create {
        #[arg(required = true)]
        sentences: Vec<String>,
    },
    /// Print a stored exercise
    Show { token: String },
    /// Show exercise statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            println!("Schema ready in {:?}", settings.db_path);
            Ok(())
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            return api::serve(settings).await;
        }
        Commands::Scrape { queries, params } => {
            let scraper = SentenceScraper::new(scraper::http_client()?, settings.search_url.clone());
            let params: SearchParams = params.into_iter().collect();
            scrape_queries(&scraper, &queries, &params).await;
            Ok(())
        }
        Commands::Create { sentences } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let token = exercise::create_exercise(&conn, &sentences)?;
            println!("{}", settings.student_url(&token));
            Ok(())
        }
        Commands::Show { token } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            show_exercise(&conn, &token)
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Exercises:       {}", s.exercises);
            println!("Sentences:       {}", s.sentences);
            println!("Tasks:           {}", s.tasks);
            println!("Completed:       {}", s.completed);
            println!("Failed attempts: {}", s.failed_attempts);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in {:?}", s));
    }
    Ok((key.to_string(), value.to_string()))
}

async fn scrape_queries(scraper: &SentenceScraper, queries: &[String], params: &SearchParams) {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(queries.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("=> "));
    }

    let mut results = Vec::with_capacity(queries.len());
    for q in queries {
        pb.set_message(q.clone());
        let report = scraper
            .fetch(&query::encode_query(q), Some(params))
            .await;
        results.push((q, report));
        pb.inc(1);
    }
    pb.finish_and_clear();

    for (q, report) in results {
        println!("== {}", q);
        match report {
            None => println!("  (site unreachable)"),
            Some(report) => {
                for s in report.sentences() {
                    println!("  #{:<8} {}", s.id, s.text);
                }
                if report.skipped() > 0 {
                    println!("  ({} result(s) skipped)", report.skipped());
                }
            }
        }
    }
}

fn show_exercise(conn: &rusqlite::Connection, token: &str) -> anyhow::Result<()> {
    let Some(ex) = db::fetch_exercise(conn, token)? else {
        println!("No exercise {}", token);
        return Ok(());
    };
    let sentences = db::fetch_sentences(conn, ex.id)?;
    let tasks = db::fetch_tasks(conn, ex.id)?;

    println!("Exercise {} (created {})", ex.student_url, ex.created_at);
    for s in &sentences {
        let rendered: String = parser::segments(&s.text)
            .into_iter()
            .map(|seg| match seg {
                Segment::Text(t) => t,
                Segment::Gap { position } => format!("[{}]____", position + 1),
            })
            .collect();
        println!("{:>3}. {}", s.position + 1, rendered);

        for t in tasks.iter().filter(|t| t.sentence_id == s.id) {
            let state = if t.is_completed { "done" } else { "open" };
            println!(
                "       [{}] task {} {} ({} failed)",
                t.position + 1,
                t.id,
                state,
                t.failed_attempts
            );
        }
    }
    Ok(())
}

/// Wall time as `1.25s`, `3m07s` or `2h05m`.
fn format_duration(d: std::time::Duration) -> String {
    match d.as_secs() {
        s if s >= 3600 => format!("{}h{:02}m", s / 3600, s % 3600 / 60),
        s if s >= 60 => format!("{}m{:02}s", s / 60, s % 60),
        _ => format!("{:.2}s", d.as_secs_f64()),
    }
}
