use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ragloop_agent::{final_answer, AgenticRag, Collaborators, ConversationStore, WorkflowOptions};
use ragloop_core::config::AppConfig;
use ragloop_core::traits::LlmClient;
use ragloop_gateway::GatewayServer;
use ragloop_llm::{LlmGenerator, LlmRater};
use ragloop_retrieval::{create_embedder, OpenSearchRetriever};

#[derive(Parser)]
#[command(name = "ragloop", version, about = "Agentic RAG with a self-correcting quality loop")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "ragloop.toml", env = "RAGLOOP_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single query and print the final state
    Run {
        /// The query; read from stdin when omitted
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Start the HTTP gateway
    Serve {
        /// Override the bind address from the config
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show current configuration with secrets masked
    Config {
        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
    /// Print the workflow topology
    Graph,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragloop=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "ragloop", &mut io::stdout());
        return Ok(());
    }

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    if let Commands::Config { json } = &cli.command {
        let redacted = config.redacted();
        if *json {
            println!("{}", serde_json::to_string_pretty(&redacted)?);
        } else {
            println!("{}", toml::to_string_pretty(&redacted)?);
        }
        return Ok(());
    }

    let options = WorkflowOptions::from(&config.workflow);
    let workflow = AgenticRag::new(&build_collaborators(&config, &options)?, &options)
        .context("Invalid workflow graph")?;

    match cli.command {
        Commands::Graph => {
            print!("{}", workflow.graph().describe());
        }
        Commands::Run { query } => {
            let mut text = query.join(" ");
            if text.trim().is_empty() {
                text = io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            if text.trim().is_empty() {
                anyhow::bail!("No query given");
            }

            let result = workflow.ask(text.trim()).await?;
            info!(
                passes = result.passes,
                termination = ?result.termination,
                elapsed_ms = result.total_elapsed_ms,
                answer_len = final_answer(&result.state).len(),
                "Run finished"
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Serve { bind } => {
            let mut gateway_config = config.gateway.clone().unwrap_or_default();
            if let Some(bind) = bind {
                gateway_config.bind = bind;
            }
            info!(bind = %gateway_config.bind, "Starting HTTP gateway");
            let server = GatewayServer::new(
                gateway_config,
                Arc::new(workflow),
                Arc::new(ConversationStore::new()),
                config.workflow.history_messages,
            );
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
        Commands::Config { .. } | Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Wire the configured services into the workflow's collaborators.
fn build_collaborators(config: &AppConfig, options: &WorkflowOptions) -> anyhow::Result<Collaborators> {
    let llm: Arc<dyn LlmClient> = Arc::from(
        ragloop_llm::create_retrying_client(&config.model, &config.fallback_models)
            .context("Failed to create LLM client")?,
    );
    let rating_llm: Arc<dyn LlmClient> = if config.rating_model.is_some() {
        Arc::from(
            ragloop_llm::create_retrying_client(config.rating_model(), &[])
                .context("Failed to create rating LLM client")?,
        )
    } else {
        llm.clone()
    };
    info!(
        provider = %config.model.provider,
        model = %config.model.model_id,
        rating_model = %config.rating_model().model_id,
        "LLM clients ready"
    );

    let embedder = config.embedding.as_ref().map(create_embedder);
    let retriever = OpenSearchRetriever::new(&config.retrieval, embedder)
        .context("Failed to create document retriever")?;
    info!(index = %config.retrieval.index, mode = ?retriever.mode(), "Document retriever ready");

    let searcher = ragloop_search::create_searcher(config.web_search.as_ref(), options.max_web_results)
        .context("Failed to create web searcher")?;

    Ok(Collaborators {
        generator: Arc::new(LlmGenerator::new(llm, config.model.clone())),
        rater: Arc::new(LlmRater::new(rating_llm, config.rating_model().clone())),
        retriever: Arc::new(retriever),
        searcher,
    })
}
