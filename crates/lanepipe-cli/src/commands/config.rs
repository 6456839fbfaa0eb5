use anyhow::Result;
use lanepipe_core::SchedulerConfig;

/// Print a full default `SchedulerConfig` as TOML to stdout.
pub fn run() -> Result<()> {
    let config = SchedulerConfig::default();
    let toml_str = toml::to_string_pretty(&config)?;
    print!("{toml_str}");
    Ok(())
}
