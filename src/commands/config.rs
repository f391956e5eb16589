use norn::clienv;
use norn::GatewayConfig;

pub(crate) fn cmd_config() -> anyhow::Result<()> {
    let config = GatewayConfig::load()?;

    println!("Configuration");
    println!("  Config File    {}", GatewayConfig::config_path().display());
    println!("  Data Dir       {}", clienv::data_dir().display());
    println!("  Settings File  {}", clienv::settings_path().display());
    println!("  Log File       {}", clienv::log_path().display());
    println!("  Idle Threshold {}ms", config.idle_threshold_ms);
    println!("  Idle Sleep     {}ms", config.idle_sleep_ms);
    println!();
    println!("Workers (spawn order)");
    for spec in &config.workers {
        println!("  {:<12} {}", spec.name, spec.role.as_str());
    }

    if let Err(e) = config.validate() {
        println!();
        println!("Warning: {}", e);
    }
    Ok(())
}
