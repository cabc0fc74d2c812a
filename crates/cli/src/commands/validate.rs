//! `taskweave validate`: check the stored partition without changing it.

use taskweave::pipeline;
use taskweave_engine::{ClusterEngine, Verdict};

use super::Context;

pub async fn run(ctx: &Context, run_id: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = ctx.config()?;
    let run_id = run_id.unwrap_or_else(|| config.cluster.run_id.clone());
    let engine = ClusterEngine::new(config.engine_config())?;
    let store = ctx.store(&config).await?;

    let validation = pipeline::validate(&store, &engine, &run_id).await?;

    println!("Validating partition '{run_id}'...");
    if let Some(report) = &validation.report {
        println!("   Stored tasks:   {}", report.stored_count);
        println!("   Present tasks:  {}", report.present_count);
        println!("   Orphaned:       {}", report.orphaned.len());
        println!("   New:            {}", report.new_tasks.len());
        println!(
            "   Parameters:     {}",
            if report.params_match { "unchanged" } else { "changed" }
        );
    }

    match validation.verdict {
        Verdict::Reuse => println!("   Stored partition is reusable"),
        Verdict::Recompute(reason) => println!("   Recompute needed: {reason}"),
    }
    Ok(())
}
