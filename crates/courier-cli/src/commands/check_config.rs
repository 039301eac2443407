use std::path::Path;

use anyhow::Context;
use courier_core::BusConfig;

pub fn execute(path: &Path) -> anyhow::Result<()> {
    let config = BusConfig::from_path(path)
        .with_context(|| format!("invalid configuration in {}", path.display()))?;

    println!("configuration OK: {}", path.display());
    println!("  input queue:       {}", config.input_queue);
    println!("  error queue:       {}", config.retry.error_queue_address);
    println!("  workers:           {}", config.workers);
    println!("  delivery attempts: {}", config.retry.max_delivery_attempts);
    println!(
        "  second level:      {}",
        if config.retry.second_level_retry_enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}
