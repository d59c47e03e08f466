//! `copilot`: ask questions about Spark, dbt and Airflow documentation.
//!
//! ```bash
//! copilot index --rebuild
//! copilot ask "How do I create a SparkSession?" --user alice
//! copilot chat --user alice
//! copilot serve --bind 0.0.0.0:8080
//! ```

use dataeng_copilot::config::{Config, DEFAULT_CONFIG_FILE};
use dataeng_copilot::history::HistoryStore;
use dataeng_copilot::index::Retriever;
use dataeng_copilot::{CopilotService, logging};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "copilot",
    version,
    about = "Retrieval-gated assistant for Spark, dbt and Airflow documentation"
)]
struct Cli {
    /// Path to the TOML configuration file. Missing files fall back to defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the documentation index, crawling and building it if needed.
    Index {
        /// Re-crawl the seed pages and rebuild the collection from scratch.
        #[arg(long)]
        rebuild: bool,
    },

    /// Ask a single question.
    Ask {
        question: String,

        #[arg(long, default_value = "default")]
        user: String,

        /// Forget earlier turns before answering.
        #[arg(long)]
        clear_history: bool,
    },

    /// Interactive session. Type `quit`, `exit` or `q` to leave.
    Chat {
        #[arg(long, default_value = "default")]
        user: String,
    },

    /// Inspect or reset a user's conversation record.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Raw similarity search against the index.
    Search {
        query: String,

        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Start the HTTP API.
    Serve {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Print the effective configuration.
    Config,
}

#[derive(Subcommand)]
enum HistoryAction {
    Show {
        #[arg(long, default_value = "default")]
        user: String,
    },
    Clear {
        #[arg(long, default_value = "default")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(Some(&cli.config))
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let _log_guard = logging::init(&config.logging)?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::History { action } => run_history(&config, action).await,
        command => {
            let service = Arc::new(CopilotService::from_config(config).await?);
            run(service, command).await
        }
    }
}

async fn run(service: Arc<CopilotService>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Index { rebuild } => {
            let index = if rebuild {
                service
                    .rebuild_index()
                    .await?
                    .context("no documents could be loaded to build the index")?
            } else {
                service.index().await?
            };
            println!("{} chunks indexed", index.chunk_count().await?);
        }
        Command::Ask {
            question,
            user,
            clear_history,
        } => {
            println!("{}", service.query(&question, &user, clear_history).await);
        }
        Command::Chat { user } => chat(&service, &user).await?,
        Command::Search { query, k } => {
            let k = k.unwrap_or(service.config().retrieval.top_k);
            let results = service.index().await?.search(&query, k).await?;
            if results.is_empty() {
                println!("no results");
            }
            for (rank, result) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} (chunk {})\n   {}\n",
                    rank + 1,
                    result.score,
                    result.chunk.source,
                    result.chunk.index,
                    result.chunk.text.replace('\n', " ")
                );
            }
        }
        Command::Serve { bind } => {
            let bind = match bind {
                Some(bind) => bind,
                None => service
                    .config()
                    .server
                    .bind
                    .parse()
                    .context("invalid server.bind")?,
            };

            // Build the index before accepting traffic.
            service.index().await?;

            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let handle =
                dataeng_copilot::api::start_http_server(bind, service.clone(), shutdown_rx).await?;

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");
            let _ = shutdown_tx.send(true);
            handle.await?;
        }
        Command::Config | Command::History { .. } => unreachable!("handled before service setup"),
    }
    Ok(())
}

async fn run_history(config: &Config, action: HistoryAction) -> anyhow::Result<()> {
    let store = HistoryStore::new(&config.paths.history_dir);
    match action {
        HistoryAction::Show { user } => {
            let turns = store.read_all(&user).await;
            if turns.is_empty() {
                println!("no history for {user}");
            }
            for turn in turns {
                println!("Q: {}\nA: {}\n", turn.question, turn.answer);
            }
        }
        HistoryAction::Clear { user } => {
            store.clear(&user).await?;
            println!("cleared history for {user}");
        }
    }
    Ok(())
}

async fn chat(service: &CopilotService, user: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }

        let answer = service.query(question, user, false).await;
        stdout.write_all(format!("{answer}\n\n").as_bytes()).await?;
    }
    Ok(())
}
