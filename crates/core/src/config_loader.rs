use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use std::path::Path;

/// Environment variable prefix; nested keys are separated by `__`,
/// e.g. `FUNDING_SNIPER_TRADING__LEVERAGE=5`.
pub const ENV_PREFIX: &str = "FUNDING_SNIPER_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging the TOML file, environment variables, and an
    /// optional JSON file with the same stem, then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be parsed, a required field is missing,
    /// or validation fails.
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let config: AppConfig = Self::figment(path)
            .extract()
            .with_context(|| format!("failed to load config from {}", path.display()))?;

        config.validate().context("invalid configuration")?;
        tracing::info!(
            environment = ?config.environment,
            margin = %config.trading.margin,
            leverage = config.trading.leverage,
            breakeven = config.breakeven.enabled,
            "configuration loaded"
        );

        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file(path.with_extension("json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, MarginMode};
    use rust_decimal_macros::dec;

    const BASE: &str = r#"
        environment = "testnet"

        [credentials]
        test_api_key = "tk"
        test_hmac_secret = "ts"

        [trading]
        margin = 50
        leverage = 3
        margin_type = "ISOLATED"
        min_funding_rate_percent = 0.5
        stop_percent = 1.5
        take_profit_percent = 2
        first_order_time_offset_ms = 250

        [breakeven]
        enabled = true
        percent = 0.25
        window_size = 3
        place_duration = 60
    "#;

    #[test]
    fn test_load_toml_with_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("Config.toml", BASE)?;

            let config = ConfigLoader::load("Config.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.environment, Environment::Testnet);
            assert_eq!(config.trading.margin, dec!(50));
            assert_eq!(config.trading.margin_type, MarginMode::Isolated);
            assert_eq!(config.trading.stop_ratio(), dec!(0.015));
            assert_eq!(config.trading.first_order_time_offset_ms, 250);
            assert_eq!(config.breakeven.window_size, 3);
            assert_eq!(config.breakeven.poll_interval_ms, 1000);
            assert_eq!(config.scanner.max_concurrent_lookups, 10);
            assert_eq!(config.scanner.top_n, 5);
            assert_eq!(config.connection.max_age_secs, 28_800);
            assert_eq!(config.rest.recv_window_ms, 5_000);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_nested_keys() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("Config.toml", BASE)?;
            jail.set_env("FUNDING_SNIPER_TRADING__LEVERAGE", "7");
            jail.set_env("FUNDING_SNIPER_SCANNER__MAX_CONCURRENT_LOOKUPS", "4");

            let config = ConfigLoader::load("Config.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.trading.leverage, 7);
            assert_eq!(config.scanner.max_concurrent_lookups, 4);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_margin_type_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("Config.toml", &BASE.replace("\"ISOLATED\"", "\"CROSS\""))?;
            assert!(ConfigLoader::load("Config.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn test_missing_credentials_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("Config.toml", &BASE.replace("test_hmac_secret = \"ts\"", ""))?;
            let err = ConfigLoader::load("Config.toml").unwrap_err();
            assert!(format!("{err:#}").contains("credentials"));
            Ok(())
        });
    }
}
