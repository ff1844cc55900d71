use anyhow::Result;
use exporter_config::Config;
use prometheus::Registry;

pub fn check_config(config: &Config) -> Result<()> {
    if config.udp_addr().is_none() && config.tcp_addr().is_none() {
        anyhow::bail!(
            "both listeners are disabled, enable at least one of `listen.udp` and `listen.tcp`"
        );
    }

    if config.udp_buffer_size() == 0 {
        anyhow::bail!("`listen.udp_buffer_size` must be greater than 0");
    }

    if config.tcp_line_buffer_size() == 0 {
        anyhow::bail!("`listen.tcp_line_buffer_size` must be greater than 0");
    }

    if config.queue_capacity() == 0 {
        anyhow::bail!("`queue.capacity` must be greater than 0");
    }

    Ok(())
}

/// Initialize the logging system.
pub fn init_logging(config: &Config) {
    exporter_log::init(config.logging());
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        exporter_log::info!("launching exporter without config file");
    } else {
        exporter_log::info!(
            "launching exporter from config file {}",
            config.path().display()
        );
    }

    match config.udp_addr() {
        Some(addr) => exporter_log::info!("  udp: {addr}"),
        None => exporter_log::info!("  udp: -"),
    };
    match config.tcp_addr() {
        Some(addr) => exporter_log::info!("  tcp: {addr}"),
        None => exporter_log::info!("  tcp: -"),
    };
    match config.mapping_path() {
        Some(path) => exporter_log::info!("  mapping: {}", path.display()),
        None => exporter_log::info!("  mapping: -"),
    };
    exporter_log::info!("  log level: {}", config.logging().level);
}

/// Initialize self-instrumentation, publishing into `registry`.
pub fn init_telemetry(registry: &Registry) {
    exporter_telemetry::init(registry.clone());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_default_config() {
        assert!(check_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_check_no_listeners() {
        let config = Config::from_yaml_str("listen:\n  udp: null\n  tcp: null\n").unwrap();
        let error = check_config(&config).unwrap_err();
        assert!(error.to_string().contains("both listeners are disabled"));
    }

    #[test]
    fn test_check_zero_capacity() {
        let config = Config::from_yaml_str("queue:\n  capacity: 0\n").unwrap();
        assert!(check_config(&config).is_err());
    }
}
