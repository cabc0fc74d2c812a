//! `taskweave report`: statistics and continuity of the stored partition.

use taskweave::pipeline;
use taskweave_engine::ContinuityReport;

use super::Context;

/// How many of the least continuous groups to list.
const WORST_SHOWN: usize = 10;

pub async fn run(
    ctx: &Context,
    run_id: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ctx.config()?;
    let run_id = run_id.unwrap_or_else(|| config.cluster.run_id.clone());
    let store = ctx.store(&config).await?;

    let Some(report) = pipeline::report(&store, &run_id).await? else {
        println!("No partition stored under '{run_id}'. Run `taskweave cluster` first.");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Partition '{}' ({} mode, threshold {:.4})",
        report.run_id, report.partition.params.mode, report.partition.params.threshold
    );
    println!();
    print!("{}", report.stats.render_markdown());
    if !report.continuity.groups.is_empty() {
        println!();
        print_continuity(&report.continuity);
    }
    Ok(())
}

pub fn print_continuity(continuity: &ContinuityReport) {
    let total = continuity.groups.len();
    println!("### Chronological Continuity");
    println!();
    println!("Average continuity: {:.1}%", continuity.avg_ratio * 100.0);
    println!("Average gap:        {:.1}", continuity.avg_gap);
    println!(
        "High (>= 80%): {}  Moderate (50-80%): {}  Low (< 50%): {}  of {total} multi-task group(s)",
        continuity.high, continuity.moderate, continuity.low
    );

    let worst: Vec<_> = continuity
        .groups
        .iter()
        .filter(|g| g.ratio < 1.0)
        .take(WORST_SHOWN)
        .collect();
    if worst.is_empty() {
        return;
    }
    println!();
    println!("Least continuous groups:");
    for g in worst {
        println!(
            "  Group {:>4}: {:>3} tasks, {:>5.1}% continuous, gaps {}..{} (avg {:.1}), runs {:?}",
            g.group_id,
            g.task_count,
            g.ratio * 100.0,
            g.min_gap,
            g.max_gap,
            g.avg_gap,
            g.runs
        );
    }
}
