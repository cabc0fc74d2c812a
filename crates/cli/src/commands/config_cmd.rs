//! `taskweave config`: print the effective configuration.

use taskweave_config::AppConfig;

use super::Context;

pub async fn run(ctx: &Context, defaults: bool) -> Result<(), Box<dyn std::error::Error>> {
    if defaults {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = ctx.config()?;
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    print!("{}", toml::to_string_pretty(&config)?);
    println!();
    println!(
        "# effective max_cluster_size = {}",
        config.budget.max_cluster_size()
    );
    if let Some(min) = config.budget.min_cluster_size() {
        println!("# effective min_cluster_size = {min}");
    }
    Ok(())
}
