use crate::gateway::GatewayConfig;

/// Internal validation, called automatically during `GatewayConfig::from_str` / `load`.
pub(crate) fn validate(config: &GatewayConfig) -> anyhow::Result<()> {
    if config.runtime.executor_parallelism == 0 {
        anyhow::bail!("runtime.executor_parallelism must be > 0");
    }
    if config.runtime.worker_pool_size == 0 {
        anyhow::bail!("runtime.worker_pool_size must be > 0");
    }

    if config.bus.capacity == 0 {
        anyhow::bail!("bus.capacity must be > 0");
    }

    if config.rules.dir.trim().is_empty() {
        anyhow::bail!("rules.dir must be a non-empty path to the rule directory");
    }

    if config.adapters_dir.trim().is_empty() {
        anyhow::bail!("adapters must be a non-empty path to the adapters.d/ directory");
    }
    if config.sinks_dir.trim().is_empty() {
        anyhow::bail!("sinks must be a non-empty path to the sinks.d/ directory");
    }

    // vars keys must be valid identifiers: [A-Za-z_][A-Za-z0-9_]*
    for key in config.vars.keys() {
        if !is_valid_var_name(key) {
            anyhow::bail!(
                "vars: invalid variable name {:?} — must match [A-Za-z_][A-Za-z0-9_]*",
                key,
            );
        }
    }

    if config.metrics.report_interval.as_duration().is_zero() {
        anyhow::bail!("metrics.report_interval must be > 0");
    }
    if config.metrics.topn.max == 0 {
        anyhow::bail!("metrics.topn.max must be > 0");
    }
    if config.metrics.topn.queue_capacity == 0 {
        anyhow::bail!("metrics.topn.queue_capacity must be > 0");
    }
    if config.metrics.enabled && config.metrics.prometheus_listen.trim().is_empty() {
        anyhow::bail!("metrics.prometheus_listen must be non-empty when metrics.enabled=true");
    }

    if let Some(server) = &config.server {
        if server.listen.trim().is_empty() {
            anyhow::bail!("server.listen must be non-empty when [server] is present");
        }
        if server.isp_timeout.as_duration().is_zero() {
            anyhow::bail!("server.isp_timeout must be > 0");
        }
        if let Some(process) = &server.process {
            if process.command.trim().is_empty() {
                anyhow::bail!("server.process.command must be non-empty when [server.process] is present");
            }
        }
    }

    Ok(())
}

/// A valid variable name starts with ASCII letter or underscore, followed by
/// ASCII alphanumerics or underscores.
fn is_valid_var_name(name: &str) -> bool {
    let mut chars = name.bytes();
    match chars.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    chars.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_name_validation() {
        assert!(is_valid_var_name("_ok"));
        assert!(is_valid_var_name("ok_123"));
        assert!(!is_valid_var_name("1bad"));
        assert!(!is_valid_var_name(""));
        assert!(!is_valid_var_name("bad-name"));
    }
}
