use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dagcore::{ExecutionEvent, Graph, NodeEvent, RawGraph};
use dagruntime::Runtime;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dag")]
#[command(about = "Dataflow graph runtime CLI", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and execute the demo graph
    Run {
        /// Also write the graph in binary form to this file
        #[arg(short, long)]
        save: Option<PathBuf>,
    },

    /// Load a saved graph and execute it
    Load {
        /// Path to a binary graph file
        file: PathBuf,
    },

    /// Print the layout of a saved graph without loading it
    Dump {
        /// Path to a binary graph file
        file: PathBuf,
    },

    /// List registered node and data types
    Types,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    match cli.command {
        Commands::Run { save } => run_demo(save).await?,
        Commands::Load { file } => load_graph(&file).await?,
        Commands::Dump { file } => dump_graph(&file)?,
        Commands::Types => list_types()?,
    }

    Ok(())
}

fn create_runtime() -> Result<Runtime> {
    Runtime::new(dagnodes::plugins()).context("failed to start runtime")
}

async fn run_demo(save: Option<PathBuf>) -> Result<()> {
    let runtime = create_runtime()?;
    let graph = dagnodes::build_demo_graph(runtime.environment())?;

    println!("🚀 Running demo graph {}", graph.id());
    println!("   Nodes: {}", graph.len());
    println!();

    if let Some(path) = save {
        let bytes = graph.serialize()?;
        std::fs::write(&path, &bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("💾 Saved {} bytes to {}", bytes.len(), path.display());
        println!();
    }

    execute(&runtime, &graph).await
}

async fn load_graph(file: &Path) -> Result<()> {
    println!("🚀 Loading graph from: {}", file.display());

    let bytes =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    tracing::debug!("Read {} bytes from {}", bytes.len(), file.display());

    let runtime = create_runtime()?;
    let graph = runtime.deserialize_graph(&bytes)?;

    println!("📋 Graph {}", graph.id());
    println!("   Nodes: {}", graph.len());
    println!();

    execute(&runtime, &graph).await
}

async fn execute(runtime: &Runtime, graph: &Graph) -> Result<()> {
    let events = runtime.subscribe_events();
    let printer = tokio::spawn(print_events(events));

    runtime.execute_async(graph).await?;

    // Let the printer drain what is already buffered.
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    printer.abort();
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<ExecutionEvent>) {
    while let Ok(event) = events.recv().await {
        match event {
            ExecutionEvent::GraphStarted { node_count, .. } => {
                println!("▶️  Graph started with {} nodes", node_count);
            }
            ExecutionEvent::NodeStarted {
                node_id, node_type, ..
            } => {
                println!("  ⚡ Starting node: {} ({})", node_id, node_type);
            }
            ExecutionEvent::NodeCompleted {
                node_id,
                duration_ms,
                ..
            } => {
                println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
            }
            ExecutionEvent::NodeFailed { node_id, error, .. } => {
                println!("  ❌ Node {} failed: {}", node_id, error);
            }
            ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                NodeEvent::Info { message } => {
                    println!("     ℹ️  [{}] {}", node_id, message);
                }
                NodeEvent::Warning { message } => {
                    println!("     ⚠️  [{}] {}", node_id, message);
                }
                NodeEvent::Progress { percent, message } => match message {
                    Some(msg) => println!("     📊 [{}] {}% - {}", node_id, percent, msg),
                    None => println!("     📊 [{}] {}%", node_id, percent),
                },
                NodeEvent::Data { port, type_name } => {
                    println!("     📤 [{}] {} ({})", node_id, port, type_name);
                }
            },
            ExecutionEvent::GraphCompleted { duration_ms, .. } => {
                println!("✨ Graph completed in {}ms", duration_ms);
            }
        }
    }
}

fn dump_graph(file: &Path) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let raw = RawGraph::parse(&bytes)?;
    print!("{}", raw);
    Ok(())
}

fn list_types() -> Result<()> {
    let runtime = create_runtime()?;

    println!("📦 Available Node Types:");
    for name in runtime.list_node_types() {
        println!("  • {}", name);
    }

    println!();
    println!("🧩 Available Data Types:");
    for name in runtime.list_data_types() {
        println!("  • {}", name);
    }
    Ok(())
}
