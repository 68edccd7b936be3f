use anyhow::Context;
use clap::{Parser, Subcommand};
use luma_core::{LumaConfig, TelemetryStore};
use luma_limbic::ArousalClassifier;
use luma_memory::SessionFixture;
use luma_reasoning::{Constraints, OrchestrationMode, Orchestrator, Selection, SelectionRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the strategy config (TOML). Missing file falls back to defaults.
    #[arg(short, long, env = "LUMA_CONFIG", default_value = "luma.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pick the next intervention for a user from a session fixture
    Select {
        /// Session fixture (JSON): catalog plus recorded history
        #[arg(short, long)]
        fixture: PathBuf,

        #[arg(short, long)]
        user: String,

        /// adaptive, targeted or exploratory
        #[arg(short, long, default_value = "adaptive")]
        mode: OrchestrationMode,

        /// Candidate ids to leave out (repeatable)
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Families to leave out (repeatable)
        #[arg(long = "exclude-family")]
        exclude_family: Vec<String>,

        /// Only consider candidates on this topic (primary or tagged)
        #[arg(long)]
        topic: Option<String>,

        /// Only consider candidates in this pillar
        #[arg(long)]
        pillar: Option<String>,

        /// Favour candidates voiced through this lens
        #[arg(long)]
        prefer_lens: Option<String>,

        /// Favour candidates working through this process
        #[arg(long)]
        prefer_process: Option<String>,

        /// Maximum runner-ups to report
        #[arg(long, default_value_t = 10)]
        runner_ups: usize,
    },
    /// Print the arousal reading for a user's recent signal window
    Classify {
        #[arg(short, long)]
        fixture: PathBuf,

        #[arg(short, long)]
        user: String,
    },
    /// Print the full therapeutic state snapshot for a user
    State {
        #[arg(short, long)]
        fixture: PathBuf,

        #[arg(short, long)]
        user: String,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    let config = LumaConfig::load_or_default(&args.config);
    config
        .strategy
        .validate()
        .context("Strategy config rejected")?;

    match args.command {
        Command::Select {
            fixture,
            user,
            mode,
            exclude,
            exclude_family,
            topic,
            pillar,
            prefer_lens,
            prefer_process,
            runner_ups,
        } => {
            let fixture = SessionFixture::load(&fixture)?;
            let now = fixture.now;
            let store = Arc::new(fixture.to_store().await);
            let orchestrator =
                Orchestrator::new(store, &config.engine).with_clock(Arc::new(move || now));

            let request = SelectionRequest::new(user, fixture.catalog)
                .with_config(config.strategy.clone())
                .with_mode(mode)
                .with_constraints(Constraints {
                    excluded_ids: exclude,
                    excluded_families: exclude_family,
                    required_topic: topic,
                    required_pillar: pillar,
                    prefer_lens,
                    prefer_process,
                })
                .with_runner_up_limit(runner_ups);

            let selection = orchestrator.select_with(request).await?;
            match &selection {
                Selection::Selected(result) => {
                    info!("Chose {} ({})", result.chosen.id, result.rationale.summary)
                }
                Selection::NoEligibleCandidate(_) => info!("No eligible candidate"),
            }
            println!("{}", serde_json::to_string_pretty(&selection)?);
        }
        Command::Classify { fixture, user } => {
            let fixture = SessionFixture::load(&fixture)?;
            let store = fixture.to_store().await;
            let classifier = ArousalClassifier::new(&config.strategy);
            let events = store
                .signal_window(&user, fixture.now - classifier.lookback())
                .await?;
            let reading = classifier.classify(&events, fixture.now);
            println!("{}", serde_json::to_string_pretty(&reading)?);
        }
        Command::State { fixture, user } => {
            let fixture = SessionFixture::load(&fixture)?;
            let now = fixture.now;
            let store = Arc::new(fixture.to_store().await);
            let orchestrator = Orchestrator::new(store, &config.engine);
            let state = orchestrator
                .aggregator()
                .compute(&user, &config.strategy, now)
                .await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }

    Ok(())
}
