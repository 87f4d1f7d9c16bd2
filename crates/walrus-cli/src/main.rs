//! walrus: reproducible data pipelines in containers.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "walrus")]
#[command(about = "Run reproducible data pipelines in containers", long_about = None)]
struct Cli {
    /// Pipeline description file (.json or .yaml)
    #[arg(short = 'i', long = "input", default_value = "pipeline.json")]
    input: PathBuf,

    /// Output directory root
    #[arg(short = 'o', long = "output", default_value = "walrus")]
    output: PathBuf,

    /// Record provenance after a successful run
    #[arg(long)]
    commit: bool,

    /// Print a stage's captured log and exit
    #[arg(long, value_name = "STAGE")]
    logs: Option<String>,

    /// Write the stage graph as a DOT file and exit
    #[arg(long, value_name = "FILE")]
    graph: Option<PathBuf>,

    /// Print the parsed pipeline and exit
    #[arg(long)]
    print: bool,

    /// Print the completed pipeline record and exit
    #[arg(long = "print-results")]
    print_results: bool,

    /// Show the difference from a prior commit and exit
    #[arg(long, value_name = "COMMIT")]
    diff: Option<String>,

    /// Roll the output repository back to a prior commit and exit
    #[arg(long, value_name = "COMMIT")]
    reset: Option<String>,

    /// Collect container stats into a profile file per stage
    #[arg(long)]
    profile: bool,

    /// Worker-pool capacity: how many stages may execute at once
    #[arg(long, default_value_t = 5)]
    workers: usize,

    /// Run the large-file server only
    #[arg(long = "lfs-server")]
    lfs_server: bool,

    /// Directory served by the large-file server
    #[arg(long = "lfs-server-dir", default_value = "lfs")]
    lfs_server_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(stage) = &cli.logs {
        return commands::logs(&cli.output, stage);
    }
    if let Some(path) = &cli.graph {
        return commands::graph(&cli.input, path);
    }
    if cli.print {
        return commands::print(&cli.input);
    }
    if cli.print_results {
        return commands::print_results(&cli.input, &cli.output);
    }
    if let Some(commit) = &cli.diff {
        return commands::diff(&cli.output, commit).await;
    }
    if let Some(commit) = &cli.reset {
        return commands::reset(&cli.output, commit).await;
    }
    if cli.lfs_server {
        return commands::lfs_server(&cli.lfs_server_dir).await;
    }

    commands::run(&cli).await
}
