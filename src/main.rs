//! # ragbot CLI
//!
//! ```bash
//! ragbot --config ./config/ragbot.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragbot serve` | Start the HTTP server |
//! | `ragbot ingest` | Embed the seed documents and insert them into the index |
//! | `ragbot ask "<question>"` | Ask one question and stream the answer |
//! | `ragbot diagnose` | Run the diagnostic prompt against the AI account |
//! | `ragbot documents` | List the configured seed documents |

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ragbot::agent::ChatRequest;
use ragbot::config;
use ragbot::documents::load_documents;
use ragbot::ingest::run_ingest;
use ragbot::llm::StreamEvent;
use ragbot::models::ChatMessage;
use ragbot::server::{self, DIAGNOSTIC_PROMPT};
use ragbot::services::Services;

/// ragbot: a retrieval-augmented chatbot over Workers AI and Vectorize.
#[derive(Parser)]
#[command(name = "ragbot", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragbot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Embed the configured documents and insert them into the vector index.
    Ingest,

    /// Ask a single question and stream the answer to stdout.
    ///
    /// Runs one retrieval-augmented turn without a stored session.
    Ask {
        /// The question text.
        question: String,
    },

    /// Send a trivial prompt to the diagnostic model and print the raw result.
    Diagnose,

    /// List the configured seed documents.
    Documents,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragbot=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest => {
            run_ingest(&cfg).await?;
        }
        Commands::Ask { question } => {
            run_ask(&cfg, &question).await?;
        }
        Commands::Diagnose => {
            let services = Services::from_config(&cfg)?;
            let result = services.diagnostic.prompt(DIAGNOSTIC_PROMPT).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Documents => {
            let docs = load_documents(&cfg)?;
            println!("documents: {}", docs.len());
            for doc in docs.iter() {
                println!("  {}  {}", doc.id, doc.text);
            }
        }
    }

    Ok(())
}

async fn run_ask(cfg: &config::Config, question: &str) -> Result<()> {
    let services = Services::from_config(cfg)?;
    let agent = services.agent();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let request = ChatRequest::new(vec![ChatMessage::user(question)]).with_cancel(cancel);
    let mut stream = agent.handle_message(request).await?;

    let mut stdout = std::io::stdout();
    while let Some(item) = stream.next().await {
        match item? {
            StreamEvent::Delta(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            StreamEvent::Done => break,
        }
    }
    println!();

    Ok(())
}
