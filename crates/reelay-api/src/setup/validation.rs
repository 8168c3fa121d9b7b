//! Configuration validation
//!
//! Runs the config's own range checks and warns about settings that leave
//! parts of the service open or disabled.

use anyhow::Result;
use reelay_core::Config;

pub fn validate_config(config: &Config) -> Result<()> {
    config.validate()?;

    if config.db_max_connections() == 0 {
        return Err(anyhow::anyhow!("Database max connections cannot be 0"));
    }

    if config.webhook_signing_secret().is_none() {
        tracing::warn!("WEBHOOK_SIGNING_SECRET not set - provider callbacks are accepted unsigned");
    }

    if config.operator_api_key().is_none() {
        tracing::warn!("OPERATOR_API_KEY not set - admin endpoints are disabled");
    }

    if !config.thumbnail_synthesized_enabled() {
        tracing::info!(
            "Synthesized thumbnails disabled - uploads without a client capture start on the placeholder"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelay_core::ReelayConfig;

    #[test]
    fn test_defaults_pass() {
        let config = Config(Box::new(ReelayConfig::for_tests()));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_connections_rejected() {
        let mut inner = ReelayConfig::for_tests();
        inner.db_max_connections = 0;
        assert!(validate_config(&Config(Box::new(inner))).is_err());
    }

    #[test]
    fn test_production_requires_signing_secret() {
        let mut inner = ReelayConfig::for_tests();
        inner.environment = "production".to_string();
        assert!(validate_config(&Config(Box::new(inner.clone()))).is_err());

        inner.webhook_signing_secret = Some("whsec".to_string());
        assert!(validate_config(&Config(Box::new(inner))).is_ok());
    }
}
