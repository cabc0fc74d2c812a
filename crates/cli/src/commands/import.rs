//! `taskweave import`: upsert tasks from a JSON-lines file.

use std::path::Path;
use taskweave_core::PartitionStore;

use super::Context;

pub async fn run(ctx: &Context, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = ctx.config()?;
    let tasks = taskweave::import::read_tasks(file)?;
    let store = ctx.store(&config).await?;

    let retry = config.retry.retry_policy();
    let written = retry
        .run("upsert_tasks", || store.upsert_tasks(&tasks))
        .await?;

    tracing::info!(file = %file.display(), tasks = written, "Import complete");
    println!("Imported {written} task(s) into {}", config.store.path.display());
    Ok(())
}
