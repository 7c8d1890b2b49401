//! RCSA CLI
//!
//! Drafts, maps and reviews risk submissions through a chain of LLM agents.

use std::path::Path;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rcsa::workflow::{Decoded, RunOptions, StateManager, WorkflowState};
use rcsa::{Config, Engine, Result};

#[derive(Parser)]
#[command(name = "rcsa")]
#[command(author, version, about = "Multi-agent risk submission workflows")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a new workflow for a project description
    Run {
        /// Free-text project description
        description: String,

        /// Use this run ID instead of a generated one
        #[arg(long)]
        run_id: Option<String>,

        /// Pause for review after every step
        #[arg(long)]
        step_by_step: bool,

        /// Prompt for feedback once the run finishes
        #[arg(long, short)]
        interactive: bool,
    },

    /// Continue a paused or interrupted run
    Resume {
        /// Run ID
        run_id: String,

        /// Pause for review after every step
        #[arg(long)]
        step_by_step: bool,
    },

    /// Show workflow status
    Status {
        /// Run ID
        run_id: String,

        /// Print the full state as JSON
        #[arg(long)]
        json: bool,
    },

    /// List workflow runs
    List,

    /// Submit feedback on a step of a run
    Feedback {
        /// Run ID
        run_id: String,

        /// Step name, e.g. map_risks
        step: String,

        /// Feedback text
        feedback: String,
    },

    /// Initialize .rcsa directory and an empty catalog
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Load config
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            description,
            run_id,
            step_by_step,
            interactive,
        } => {
            let engine = Engine::from_config(&config)?;
            let options = RunOptions { step_by_step };
            let run_id = engine.create(run_id, &description).await?;
            println!("Run ID: {}", run_id);
            let state = engine.run(&run_id, &options).await?;
            print_state(&state);

            if interactive {
                feedback_loop(&engine, &run_id, &state).await?;
            }
        }

        Commands::Resume {
            run_id,
            step_by_step,
        } => {
            let engine = Engine::from_config(&config)?;
            let state = engine.run(&run_id, &RunOptions { step_by_step }).await?;
            print_state(&state);
        }

        Commands::Status { run_id, json } => {
            let state = store(&config).load(&run_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print_state(&state);
            }
        }

        Commands::List => {
            let store = store(&config);
            for run_id in store.list()? {
                match store.load(&run_id) {
                    Ok(state) => println!(
                        "{} | {:?} | {} | {} | {}",
                        run_id,
                        state.status(),
                        state.updated_at().format("%Y-%m-%d %H:%M"),
                        state.current_step().map(|s| s.name()).unwrap_or("-"),
                        truncate(state.project_description(), 60)
                    ),
                    Err(e) => println!("{} | unreadable: {}", run_id, e),
                }
            }
        }

        Commands::Feedback {
            run_id,
            step,
            feedback,
        } => {
            let engine = Engine::from_config(&config)?;
            let state = engine.submit_feedback(&run_id, &step, &feedback).await?;
            info!("Recorded feedback for {} on {}", step, run_id);
            print_state(&state);
        }

        Commands::Init { force } => {
            rcsa::config::init(Path::new("."), force)?;
            info!("Initialized .rcsa directory");
        }

        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("Failed to serialize config: {}", e),
        },
    }

    Ok(())
}

/// Store access without building a harness
fn store(config: &Config) -> StateManager {
    StateManager::file(config.store_dir())
}

fn print_state(state: &WorkflowState) {
    println!("\n{}", state.summary());

    if let Some(decision) = state.decision_result() {
        match decision {
            Decoded::Parsed(d) => println!("\nDecision: {} ({})", d.decision, d.rationale),
            Decoded::Raw(text) => println!("\nDecision (unparsed): {}", text),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}…", cut)
    }
}

/// Prompt for step feedback until the user enters a blank step name
async fn feedback_loop(engine: &Engine, run_id: &str, state: &WorkflowState) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let steps: Vec<&str> = state.executed_steps().iter().map(|s| s.name()).collect();
        stdout
            .write_all(format!("\nStep to revise [{}] (blank to quit): ", steps.join(", ")).as_bytes())
            .await?;
        stdout.flush().await?;

        let Some(step) = lines.next_line().await? else {
            break;
        };
        let step = step.trim().to_string();
        if step.is_empty() {
            break;
        }

        stdout.write_all(b"Feedback: ").await?;
        stdout.flush().await?;
        let Some(feedback) = lines.next_line().await? else {
            break;
        };

        match engine.submit_feedback(run_id, &step, feedback.trim()).await {
            Ok(updated) => print_state(&updated),
            Err(e) => eprintln!("Feedback not applied: {}", e),
        }
    }

    Ok(())
}
