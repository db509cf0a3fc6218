//! commi - CLI entry point.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use commi::commit::{Candidate, Scope, lint};
use commi::config::{Config, env_overrides};
use commi::pipeline::Pipeline;

/// Generate commit messages for pending changes using Gemini.
#[derive(Parser, Debug)]
#[command(name = "commi")]
#[command(about = "Generate commit messages for pending changes using Gemini")]
#[command(version)]
struct Cli {
    /// Path to the git repository
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Gemini API key (defaults to GEMINI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Describe only staged changes
    #[arg(long, conflicts_with = "unstaged")]
    cached: bool,

    /// Describe only unstaged changes, including untracked files
    #[arg(long)]
    unstaged: bool,

    /// Gemini model name
    #[arg(long)]
    model: Option<String>,

    /// Number of alternatives to ask for
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Language to write the messages in
    #[arg(long)]
    language: Option<String>,

    /// Append a Co-authored-by trailer for this email
    #[arg(long)]
    co_author: Option<String>,

    /// Ask for conventional commit prefixes (feat:, fix:, ...)
    #[arg(long)]
    conventional: bool,

    /// Message style: neutral, concise, or detailed
    #[arg(long)]
    tone: Option<String>,

    /// Log prompts, responses, and debug details to stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn scope(&self) -> Scope {
        if self.cached {
            Scope::Staged
        } else if self.unstaged {
            Scope::Unstaged
        } else {
            Scope::All
        }
    }

    /// Merge CLI flags over environment overrides; flags win.
    fn config_map(&self) -> HashMap<String, String> {
        let mut map = env_overrides();

        let flags = [
            ("api_key", self.api_key.clone()),
            ("model", self.model.clone()),
            ("candidate_count", self.count.map(|n| n.to_string())),
            ("target_language", self.language.clone()),
            ("tone", self.tone.clone()),
            ("conventional", self.conventional.then(|| "true".to_string())),
            ("verbose", self.verbose.then(|| "true".to_string())),
        ];
        for (key, value) in flags {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        }

        map
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::from_map(&cli.config_map()).context("Invalid configuration")?;
    let credentials = config.credentials.clone();
    let max_subject_length = config.max_subject_length;
    let style = config.style();

    let scope = cli.scope();
    let pipeline = Pipeline::new(config);

    eprintln!("Generating commit messages for {} changes...", scope);

    let candidates = pipeline
        .generate_until(&cli.repo, scope, &style, &credentials, shutdown_signal())
        .await
        .context("Failed to generate commit messages")?;

    for (idx, candidate) in candidates.iter().enumerate() {
        print_candidate(idx + 1, candidate, cli.co_author.as_deref());

        for issue in lint(&candidate.format(), max_subject_length) {
            eprintln!("Warning: option {}: {}", idx + 1, issue);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "commi=debug" } else { "commi=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn print_candidate(number: usize, candidate: &Candidate, co_author: Option<&str>) {
    let message = match co_author {
        Some(email) => candidate.format_with_co_author(email),
        None => candidate.format(),
    };

    println!("--- Option {} ---", number);
    println!("{}\n", message);
}
