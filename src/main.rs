use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

use memrag::config::AppConfig;
use memrag::ingest::{ingest_corpus, IngestOptions};
use memrag::memory::{create_session, list_recent_memories};
use memrag::optimize::{run_optimize, OptimizeOptions, OptimizeRun};
use memrag::providers::cached::{CachedChat, Embedder};
use memrag::providers::openai::{OpenAiCompatChat, OpenAiCompatEmbeddings, OpenAiCompatOptions};
use memrag::rag::pipeline::{run_turn, TurnInput};
use memrag::rag::types::{MemoryBlend, PipelineConfig};
use memrag::report::write_optimize_summary;

#[derive(Parser)]
#[command(name = "memrag", version, about = "Personal research assistant with long-term memory and RAG auto-tuning")]
struct Cli {
    /// Path to config.toml (defaults to ~/.memrag/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a corpus directory of .md/.txt files
    Ingest {
        /// Corpus root directory
        path: PathBuf,
        #[arg(long, default_value_t = 800)]
        chunk_size: u32,
        #[arg(long, default_value_t = 100)]
        overlap: u32,
    },
    /// Interactive question answering over the ingested corpus
    Chat {
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// Disable semantic memory writes for this session
        #[arg(long)]
        no_memory_writes: bool,
    },
    /// Evaluate one configuration against a JSONL question set
    Eval {
        /// Questions file (JSONL: {id, question, expected_sources?})
        questions: PathBuf,
        /// Output directory for results (defaults under the runs dir)
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        limit: Option<usize>,
        /// Enable semantic memory writes during the run
        #[arg(long)]
        memory_writes: bool,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Two-stage configuration search over the question set
    Optimize {
        questions: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 8)]
        warmup: usize,
        #[arg(long, default_value_t = 24)]
        min_configs: usize,
        /// Questions per config in the screening stage
        #[arg(long, default_value_t = 3)]
        stage_a: usize,
        /// Questions per config in the finalist stage
        #[arg(long, default_value_t = 8)]
        stage_b: usize,
        #[arg(long, default_value_t = 5)]
        top_n: usize,
    },
    /// Inspect the semantic memory store
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// List the most recently stored memories
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args)]
struct PipelineArgs {
    #[arg(long, default_value_t = 800)]
    chunk_size: u32,
    #[arg(long, default_value_t = 100)]
    overlap: u32,
    #[arg(long, default_value_t = 10)]
    top_k: u32,
    #[arg(long)]
    rewrite: bool,
    #[arg(long)]
    rerank: bool,
    #[arg(long, default_value_t = 6000)]
    context_budget: u32,
    /// "docs_only" or "docs+semantic"
    #[arg(long, default_value = "docs+semantic")]
    memory_blend: String,
}

impl PipelineArgs {
    fn to_config(&self) -> Result<PipelineConfig> {
        let memory_blend = match self.memory_blend.as_str() {
            "docs_only" => MemoryBlend::DocsOnly,
            "docs+semantic" => MemoryBlend::DocsAndSemantic,
            other => bail!("unknown memory blend {other:?}; use docs_only or docs+semantic"),
        };
        let config = PipelineConfig {
            chunk_size_tokens: self.chunk_size,
            overlap_tokens: self.overlap,
            top_k: self.top_k,
            rewrite: self.rewrite,
            rerank: self.rerank,
            context_budget_tokens: self.context_budget,
            memory_blend,
        };
        config.validate()?;
        Ok(config)
    }
}

struct Clients {
    answer: CachedChat,
    support: CachedChat,
    judge: CachedChat,
    embedder: Embedder,
}

fn build_clients(db: &Arc<Mutex<Connection>>, config: &AppConfig) -> Clients {
    let chat_opts = |settings: &memrag::config::ProviderSettings| OpenAiCompatOptions {
        provider: settings.provider.clone(),
        base_url: settings.base_url.clone(),
        api_key: settings.api_key.clone(),
        model: settings.model.clone(),
        default_headers: Default::default(),
    };

    Clients {
        answer: CachedChat::new(
            db.clone(),
            Box::new(OpenAiCompatChat::new(chat_opts(&config.chat))),
        ),
        support: CachedChat::new(
            db.clone(),
            Box::new(OpenAiCompatChat::new(chat_opts(&config.support))),
        ),
        judge: CachedChat::new(
            db.clone(),
            Box::new(OpenAiCompatChat::new(chat_opts(&config.judge))),
        ),
        embedder: Embedder::new(
            db.clone(),
            Box::new(OpenAiCompatEmbeddings::new(chat_opts(&config.embedding))),
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let db = Arc::new(Mutex::new(memrag::db::open_database(
        &config.resolved_db_path(),
    )?));

    match cli.command {
        Command::Ingest { path, chunk_size, overlap } => {
            let clients = build_clients(&db, &config);
            let stats = ingest_corpus(
                &db,
                &clients.embedder,
                &IngestOptions {
                    corpus_path: path,
                    chunk_size_tokens: chunk_size,
                    overlap_tokens: overlap,
                },
            )
            .await?;
            println!(
                "{} files, {} upserted, {} unchanged, {} chunks written",
                stats.files_found,
                stats.documents_upserted,
                stats.documents_skipped,
                stats.chunks_written
            );
        }
        Command::Chat { pipeline, no_memory_writes } => {
            let clients = build_clients(&db, &config);
            let pipeline_config = pipeline.to_config()?;
            chat_repl(&db, &clients, &pipeline_config, !no_memory_writes).await?;
        }
        Command::Eval { questions, out, limit, memory_writes, pipeline } => {
            let clients = build_clients(&db, &config);
            let pipeline_config = pipeline.to_config()?;
            let session = {
                let conn = db.lock().expect("db mutex poisoned");
                create_session(&conn)?
            };
            let out_dir = out.unwrap_or_else(|| {
                config.resolved_runs_dir().join(format!("eval-{}", run_stamp()))
            });
            let outcome = memrag::eval::run_eval(
                memrag::eval::EvalRun {
                    db: &db,
                    embedder: &clients.embedder,
                    answer_chat: &clients.answer,
                    support_chat: Some(&clients.support),
                    judge_chat: &clients.judge,
                    config: &pipeline_config,
                    session_id: &session.id,
                },
                &memrag::eval::RunEvalOptions {
                    questions_path: questions,
                    out_dir,
                    limit,
                    enable_memory_writes: memory_writes,
                    cost_model_path: Some(config.resolved_cost_model_path()),
                    pricing_path: Some(config.resolved_pricing_path()),
                },
            )
            .await?;
            println!("{} questions scored, results at {}", outcome.count, outcome.results_path.display());
        }
        Command::Optimize { questions, out, seed, warmup, min_configs, stage_a, stage_b, top_n } => {
            let clients = build_clients(&db, &config);
            let out_dir = out.unwrap_or_else(|| {
                config.resolved_runs_dir().join(format!("optimize-{}", run_stamp()))
            });
            let artifacts = run_optimize(
                OptimizeRun {
                    db: &db,
                    embedder: &clients.embedder,
                    answer_chat: &clients.answer,
                    support_chat: Some(&clients.support),
                    judge_chat: &clients.judge,
                },
                &OptimizeOptions {
                    questions_path: questions,
                    out_dir: out_dir.clone(),
                    seed,
                    warmup,
                    min_configs,
                    stage_a_questions: stage_a,
                    stage_b_questions: stage_b,
                    top_n,
                    cost_model_path: Some(config.resolved_cost_model_path()),
                    pricing_path: Some(config.resolved_pricing_path()),
                },
            )
            .await?;
            let summary = write_optimize_summary(&out_dir)?;
            if let Some(best) = &summary.best_by_score {
                println!("best config by score: {} (avg {:.2})", best.config_hash, best.avg_score);
            }
            println!("artifacts at {}", artifacts.pareto_path.parent().unwrap_or(&out_dir).display());
        }
        Command::Memory { action } => match action {
            MemoryAction::List { limit } => {
                let conn = db.lock().expect("db mutex poisoned");
                for m in list_recent_memories(&conn, limit)? {
                    let superseded = m
                        .supersedes_id
                        .map(|id| format!(" supersedes={id}"))
                        .unwrap_or_default();
                    println!(
                        "[{}] ({}) imp={:.2} conf={:.2}{} {}",
                        m.id, m.kind, m.importance, m.confidence, superseded, m.text
                    );
                }
            }
        },
    }

    Ok(())
}

async fn chat_repl(
    db: &Arc<Mutex<Connection>>,
    clients: &Clients,
    config: &PipelineConfig,
    memory_writes: bool,
) -> Result<()> {
    let session = {
        let conn = db.lock().expect("db mutex poisoned");
        create_session(&conn)?
    };
    println!("session {} (ctrl-d to exit)", session.id);

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        let turn = run_turn(TurnInput {
            db,
            embedder: &clients.embedder,
            answer_chat: &clients.answer,
            support_chat: Some(&clients.support),
            config,
            session_id: &session.id,
            question,
            enable_memory_writes: memory_writes,
        })
        .await?;

        println!("\n{}\n", turn.answer);
        for s in &turn.sources {
            println!("  [{}] {} (score {:.3})", s.citation, s.document_path, s.score);
        }
        if let Some(write) = &turn.memory_write {
            if write.stored > 0 {
                println!("  (stored {} memories, {} superseded)", write.stored, write.superseded);
            }
        }
        println!();
    }
    Ok(())
}

fn run_stamp() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}
