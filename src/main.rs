use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use codesum_core::bootstrap::{create_provider, detect_context_window, resolve_config_path};
use codesum_core::{
    AskRequest, CodeQa, Config, ConversationTurn, ErrorKind, GitFetcher, PipelineError, RepoCache,
};

/// Ask questions about any git repository.
#[derive(Parser)]
#[command(name = "codesum", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to $CODESUM_CONFIG, then config/default.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question about a repository and print the answer as JSON
    Ask(AskArgs),

    /// Manage cached repository snapshots
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct AskArgs {
    /// Repository URL or local path
    #[arg(value_name = "URL", required_unless_present = "request")]
    url: Option<String>,

    /// Question to ask (defaults to a repository summary)
    #[arg(short, long, conflicts_with = "request")]
    question: Option<String>,

    /// JSON file with prior conversation turns
    #[arg(long, value_name = "FILE", conflicts_with = "request")]
    history: Option<PathBuf>,

    /// JSON file holding a complete request
    #[arg(long, value_name = "FILE", conflicts_with = "url")]
    request: Option<PathBuf>,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove expired and orphaned snapshots
    Prune,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration as TOML, without secrets
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_subscriber();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(report(&e)),
    }
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = resolve_config_path(cli.config);
    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match cli.command {
        Command::Ask(args) => {
            let request = build_request(args)?;
            config.resolve_secrets();
            ask(&config, request).await
        }
        Command::Cache {
            action: CacheAction::Prune,
        } => {
            let cache = RepoCache::new(
                &config.cache.root,
                config.cache.ttl(),
                GitFetcher::new(config.timeouts.fetch()),
            );
            let removed = cache.prune().await?;
            println!("pruned {removed} snapshot(s) under {}", cache.root().display());
            Ok(())
        }
        Command::Config {
            action: ConfigAction::Show,
        } => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn ask(config: &Config, request: AskRequest) -> anyhow::Result<()> {
    let mut provider = create_provider(config)?;
    detect_context_window(&mut provider, config).await;
    let qa = CodeQa::from_config(config, Arc::new(provider))?;

    let answer = tokio::select! {
        result = qa.ask(request) => result?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("interrupted"),
    };
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}

/// Assemble the request from `--request` or from the URL, question and history flags.
fn build_request(args: AskArgs) -> Result<AskRequest, PipelineError> {
    if let Some(path) = args.request {
        return read_json(&path, "request");
    }
    let history: Vec<ConversationTurn> = match args.history {
        Some(path) => read_json(&path, "history")?,
        None => Vec::new(),
    };
    Ok(AskRequest {
        repository_url: args.url.unwrap_or_default(),
        history,
        question: args.question,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T, PipelineError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Validation(format!("cannot read {what} file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        PipelineError::Validation(format!("malformed {what} file {}: {e}", path.display()))
    })
}

/// Print request failures as JSON on stdout, anything else on stderr, and pick the exit
/// status: 2 for invalid requests, 1 otherwise.
fn report(err: &anyhow::Error) -> u8 {
    let Some(pipeline) = err.downcast_ref::<PipelineError>() else {
        eprintln!("error: {err:#}");
        return 1;
    };
    let body = serde_json::json!({
        "error": {
            "kind": pipeline.kind(),
            "message": pipeline.to_string(),
        }
    });
    println!("{body:#}");
    if pipeline.kind() == ErrorKind::Validation {
        2
    } else {
        1
    }
}
