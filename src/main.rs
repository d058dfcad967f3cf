use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use novel2outline::core::config::Config;
use novel2outline::core::io::{NativeStorage, Storage};
use novel2outline::services::checkpoint::{CheckpointStore, FileCheckpointStore, Resumption};
use novel2outline::services::documents::FsDocumentStore;
use novel2outline::services::index::{load_fragments, HttpEmbedder, LocalVectorIndex, SemanticIndex};
use novel2outline::services::intent::IntentRouter;
use novel2outline::services::llm::create_llm;
use novel2outline::services::operator::{InquireOperator, Operator};
use novel2outline::services::workflow::WorkflowEngine;

/// Iterative novel-outline generation with resumable checkpoints
#[derive(Parser)]
#[command(name = "novel2outline", version, about)]
struct Cli {
    /// Config file
    #[arg(short, long, default_value = "config.yml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate outlines batch by batch (default)
    Run {
        /// Seed prompt for a new cycle
        #[arg(short, long)]
        prompt: Option<String>,

        /// Session to resume or create (overrides config)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Classify text as a question or chat
    Classify { text: String },

    /// Manage the reference index
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Search the reference index
    Query {
        text: String,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Clear the index and rebuild it from the references folder
    Init,
    /// Append files (default: every .txt in the references folder)
    Add { files: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match Config::load_from(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure '{}' exists with valid LLM settings.", cli.config.display());
            return Err(e);
        }
    };

    match cli.command.unwrap_or(Commands::Run { prompt: None, session: None }) {
        Commands::Run { prompt, session } => {
            if let Some(session) = session {
                config.session = session;
                config.validate()?;
            }
            config.ensure_directories()?;
            run_workflow(config, prompt).await
        }
        Commands::Classify { text } => {
            let llm = create_llm(&config)?;
            let result = IntentRouter::new(llm.as_ref()).classify(&text).await;
            if result.fallback {
                println!("(model unavailable, keyword rules used)");
            }
            println!("[{}] {}", result.intent, result.intent.respond());
            Ok(())
        }
        Commands::Index { action } => {
            let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
            let embedder = Arc::new(HttpEmbedder::new(&config.rag.embedding));
            let mut index = LocalVectorIndex::open(&config.rag, storage.clone(), embedder).await?;

            let files = match action {
                IndexAction::Init => {
                    println!("Clearing index {} for re-initialization.", config.rag.index_path);
                    index.clear().await?;
                    reference_files(storage.as_ref(), &config.rag.references_folder).await?
                }
                IndexAction::Add { files } if files.is_empty() => {
                    reference_files(storage.as_ref(), &config.rag.references_folder).await?
                }
                IndexAction::Add { files } => files
                    .into_iter()
                    .filter(|f| f.ends_with(".txt") && Path::new(f).is_file())
                    .collect(),
            };

            if files.is_empty() {
                println!("No .txt files to add.");
                return Ok(());
            }

            let fragments = load_fragments(storage.as_ref(), &files).await;
            let added = index.add(fragments).await?;
            println!("Indexed {} fragments ({} total).", added, index.len());
            Ok(())
        }
        Commands::Query { text, top_k } => {
            let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
            let embedder = Arc::new(HttpEmbedder::new(&config.rag.embedding));
            let index = LocalVectorIndex::open(&config.rag, storage, embedder).await?;
            if index.is_empty() {
                println!("Index is empty. Run 'novel2outline index init' first.");
                return Ok(());
            }

            let top_k = index.clamp_top_k(top_k.unwrap_or(config.rag.top_k));
            let hits = index.query(&text, top_k).await?;
            if hits.is_empty() {
                println!("No matching fragments.");
                return Ok(());
            }

            println!("Found {} fragments (top {}):\n", hits.len(), top_k);
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. score: {:.4} | source: {}", i + 1, hit.score, hit.source);
                println!("   {}\n", hit.text);
            }
            Ok(())
        }
    }
}

async fn run_workflow(config: Config, prompt: Option<String>) -> Result<()> {
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let documents = Arc::new(FsDocumentStore::new(&config, storage.clone()));
    let checkpoints = Arc::new(FileCheckpointStore::new(&config.state_folder, storage));
    let mut operator = InquireOperator::new();

    // A brand-new session needs a seed; ask for one instead of failing outright.
    let seed = match prompt {
        Some(p) => Some(p),
        None => {
            let saved = checkpoints
                .get(&config.session)
                .await
                .context("Failed to read checkpoint")?;
            match Resumption::decide(saved) {
                Resumption::FreshStart => operator.read_line("请输入开篇要求：")?,
                _ => None,
            }
        }
    };

    let llm = create_llm(&config)?;
    let mut engine = WorkflowEngine::new(&config, llm, documents, checkpoints, Box::new(operator));

    match engine.run(seed).await {
        Ok(state) => {
            println!(
                "Session '{}' saved at unit {}. Run again to continue.",
                config.session, state.progress_counter
            );
            Ok(())
        }
        Err(e) => {
            match e.step() {
                Some(step) => eprintln!("{} step failed: {}", step, e),
                None => eprintln!("Workflow failed: {}", e),
            }
            std::process::exit(1);
        }
    }
}

async fn reference_files(storage: &dyn Storage, folder: &str) -> Result<Vec<String>> {
    let mut files: Vec<String> = storage
        .list(folder)
        .await?
        .into_iter()
        .filter(|e| e.ends_with(".txt"))
        .collect();
    files.sort();
    Ok(files)
}
