//! `taskweave cluster`: purge, validate, reuse or recompute, report.

use taskweave::pipeline::{self, Action, ClusterRun};
use taskweave_core::ClusterMode;
use taskweave_engine::ClusterEngine;

use super::Context;

pub async fn run(
    ctx: &Context,
    force: bool,
    mode: Option<ClusterMode>,
    run_id: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ctx.config()?;
    if let Some(mode) = mode {
        config.cluster.mode = mode;
    }
    let run_id = run_id.unwrap_or_else(|| config.cluster.run_id.clone());

    let engine = ClusterEngine::new(config.engine_config())?;
    let store = ctx.store(&config).await?;
    let retry = config.retry.retry_policy();

    let run = pipeline::cluster(&store, &engine, &retry, &run_id, force).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run(&run);
    }
    Ok(())
}

fn print_run(run: &ClusterRun) {
    match run.action {
        Action::Reused => println!("Reused stored partition '{}'", run.run_id),
        Action::Recomputed(reason) => {
            println!("Recomputed partition '{}' ({reason})", run.run_id)
        }
        Action::Forced => println!("Recomputed partition '{}' (forced)", run.run_id),
    }
    if run.purged > 0 {
        println!("Purged {} orphaned member(s)", run.purged);
    }
    if let Some(threshold) = &run.threshold {
        println!(
            "Threshold: {:.4} ({}), {} of {} distances at or below",
            threshold.threshold,
            threshold.source,
            threshold.distances.at_or_below,
            threshold.distances.count
        );
    }
    if run.diagnostics.deepest_split_level > 0 {
        println!(
            "Split depth: {} level(s), {} forced fallback(s)",
            run.diagnostics.deepest_split_level, run.diagnostics.forced_fallbacks
        );
    }
    println!();
    print!("{}", run.stats.render_markdown());
    if !run.continuity.groups.is_empty() {
        println!();
        super::report::print_continuity(&run.continuity);
    }
}
