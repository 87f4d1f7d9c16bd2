//! Command implementations.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use walrus_core::{ContainerRuntime, LargeFileStore, Pipeline};
use walrus_executor::DockerRuntime;
use walrus_provenance::GitLfsStore;
use walrus_scheduler::{RunOptions, Scheduler, scheduler::LOG_FILENAME};

use crate::Cli;

/// Parse, prepare and schedule the pipeline; write the completed record
/// and optionally capture provenance.
pub async fn run(cli: &Cli) -> Result<()> {
    let mut pipeline = walrus_config::parse_config(&cli.input)
        .with_context(|| format!("could not load {}", cli.input.display()))?;

    println!("Running pipeline: {}", pipeline.name);
    println!("Stages: {}", pipeline.stages.len());

    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::new().context("could not connect to Docker")?);

    let rootpath = std::path::absolute(&cli.output)?;
    std::fs::create_dir_all(&rootpath)
        .with_context(|| format!("could not create output directory {}", rootpath.display()))?;

    let _umask = walrus_scheduler::prepare(runtime.as_ref(), &mut pipeline).await?;

    let opts = RunOptions {
        workers: cli.workers,
        profile: cli.profile,
        ..Default::default()
    };
    let scheduler = Scheduler::new(runtime, &rootpath, opts);
    scheduler.run(&mut pipeline).await?;

    println!(
        "Pipeline '{}' completed in {:.2?}",
        pipeline.name, pipeline.runtime
    );

    if cli.commit || pipeline.commit {
        pipeline.commit = true;
        let store = GitLfsStore::discover(&rootpath).await?;
        walrus_provenance::record(&store, &mut pipeline, &rootpath).await?;

        let record_path = write_record(&pipeline, &cli.input, &rootpath)?;
        store
            .add_and_commit(&record_path, "Add pipeline configurations")
            .await?;
        println!("Recorded provenance; repository head is {}", pipeline.version);
    } else {
        write_record(&pipeline, &cli.input, &rootpath)?;
    }

    Ok(())
}

/// Serialize the completed pipeline into the output directory under the
/// description's base name, returning the record path.
fn write_record(
    pipeline: &Pipeline,
    input: &Path,
    rootpath: &Path,
) -> Result<std::path::PathBuf> {
    let name = input
        .file_name()
        .context("description path has no file name")?;
    let record_path = rootpath.join(name);
    walrus_config::write_description(pipeline, &record_path)?;
    Ok(record_path)
}

pub fn logs(output: &Path, stage: &str) -> Result<()> {
    let path = output.join(stage).join(LOG_FILENAME);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("no log for stage '{}' at {}", stage, path.display()))?;
    print!("{}", contents);
    Ok(())
}

pub fn graph(input: &Path, out: &Path) -> Result<()> {
    let pipeline = walrus_config::parse_config(input)?;
    walrus_config::graph::write_dot(&pipeline, out)?;
    println!("Wrote stage graph to {}", out.display());
    Ok(())
}

pub fn print(input: &Path) -> Result<()> {
    let pipeline = walrus_config::parse_config(input)?;
    print!("{}", pipeline);
    Ok(())
}

pub fn print_results(input: &Path, output: &Path) -> Result<()> {
    let name = input
        .file_name()
        .context("description path has no file name")?;
    let record_path = output.join(name);
    let bytes = std::fs::read(&record_path).with_context(|| {
        format!(
            "no completed pipeline record at {}; has the pipeline run?",
            record_path.display()
        )
    })?;
    let pipeline = walrus_config::read_description(&bytes, &record_path)?;
    print!("{}", pipeline);
    Ok(())
}

pub async fn diff(output: &Path, commit: &str) -> Result<()> {
    let store = GitLfsStore::discover(output).await?;
    let diff = store.diff(commit).await?;
    println!("{}", diff);
    Ok(())
}

pub async fn reset(output: &Path, commit: &str) -> Result<()> {
    print!(
        "Reset pipeline output to {}? This discards later results. [y/N] ",
        commit
    );
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    if !answer.trim().eq_ignore_ascii_case("y") {
        println!("Aborted");
        return Ok(());
    }

    let store = GitLfsStore::discover(output).await?;
    store.reset(commit).await?;
    println!("Reset to {}", commit);
    Ok(())
}

pub async fn lfs_server(dir: &Path) -> Result<()> {
    let runtime = DockerRuntime::new().context("could not connect to Docker")?;
    std::fs::create_dir_all(dir)?;
    walrus_provenance::server::start_server(&runtime, dir).await?;
    println!(
        "Large-file server running on port {}",
        walrus_provenance::server::LFS_SERVER_PORT
    );
    Ok(())
}
