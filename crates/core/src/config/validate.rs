use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Retry policy allows at least one attempt
/// - Poll interval, delivery timeout and notifier buffer are non-zero
/// - Ready marker is a plain file name
/// - Upload session sweep interval is non-zero
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let processor = &config.processor;

    if processor.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "processor.retry.max_attempts must be at least 1".to_string(),
        ));
    }

    if processor.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "processor.poll_interval_ms cannot be 0".to_string(),
        ));
    }

    if processor.delivery_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "processor.delivery_timeout_secs cannot be 0".to_string(),
        ));
    }

    if processor.retry.base_delay_ms > processor.retry.max_delay_ms {
        return Err(ConfigError::ValidationError(format!(
            "processor.retry.base_delay_ms ({}) exceeds max_delay_ms ({})",
            processor.retry.base_delay_ms, processor.retry.max_delay_ms
        )));
    }

    if config.notifier.buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "notifier.buffer_size cannot be 0".to_string(),
        ));
    }

    if config.upload.session_sweep_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "upload.session_sweep_interval_secs cannot be 0".to_string(),
        ));
    }

    let marker = &config.delivery.ready_marker;
    if marker.is_empty() || marker.contains('/') || marker.contains('\\') || marker == ".." {
        return Err(ConfigError::ValidationError(format!(
            "delivery.ready_marker must be a plain file name, got {:?}",
            marker
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_attempts_fails() {
        let mut config = Config::default();
        config.processor.retry.max_attempts = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_poll_interval_fails() {
        let mut config = Config::default();
        config.processor.poll_interval_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_inverted_backoff_bounds_fails() {
        let mut config = Config::default();
        config.processor.retry.base_delay_ms = 10_000;
        config.processor.retry.max_delay_ms = 1_000;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("base_delay_ms"));
    }

    #[test]
    fn test_validate_zero_sweep_interval_fails() {
        let mut config = Config::default();
        config.upload.session_sweep_interval_secs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("session_sweep_interval_secs"));
    }

    #[test]
    fn test_validate_marker_with_separator_fails() {
        let mut config = Config::default();
        config.delivery.ready_marker = "../submit.ready".to_string();
        assert!(validate_config(&config).is_err());
    }
}
