use anyhow::{bail, ensure, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which exchange deployment the bot talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Mainnet,
    Testnet,
}

/// Account-wide margin mode. Names are case sensitive on the wire and in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginMode {
    #[serde(rename = "ISOLATED")]
    Isolated,
    #[serde(rename = "REGULAR")]
    Regular,
    #[serde(rename = "PORTFOLIO")]
    Portfolio,
}

impl MarginMode {
    /// Value expected by the exchange's `setMarginMode` field.
    #[must_use]
    pub const fn as_api_str(self) -> &'static str {
        match self {
            Self::Isolated => "ISOLATED_MARGIN",
            Self::Regular => "REGULAR_MARGIN",
            Self::Portfolio => "PORTFOLIO_MARGIN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,
    pub credentials: CredentialsConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub breakeven: BreakevenConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub rest: RestConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub hmac_secret: String,
    #[serde(default)]
    pub test_api_key: String,
    #[serde(default)]
    pub test_hmac_secret: String,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("api_key", &self.api_key)
            .field("hmac_secret", &"[REDACTED]")
            .field("test_api_key", &self.test_api_key)
            .field("test_hmac_secret", &"[REDACTED]")
            .finish()
    }
}

/// The key pair selected for the active environment.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Quote-currency margin committed per trade.
    pub margin: Decimal,
    pub leverage: u32,
    pub margin_type: MarginMode,
    pub min_funding_rate_percent: Decimal,
    pub stop_percent: Decimal,
    pub take_profit_percent: Decimal,
    #[serde(default)]
    pub first_order_time_offset_ms: i64,
    #[serde(default = "default_pending_trade_ttl_secs")]
    pub pending_trade_ttl_secs: u64,
}

impl TradingConfig {
    /// Minimum absolute funding rate as a fraction (percent / 100).
    #[must_use]
    pub fn min_funding_rate(&self) -> Decimal {
        self.min_funding_rate_percent / Decimal::ONE_HUNDRED
    }

    #[must_use]
    pub fn stop_ratio(&self) -> Decimal {
        self.stop_percent / Decimal::ONE_HUNDRED
    }

    #[must_use]
    pub fn take_profit_ratio(&self) -> Decimal {
        self.take_profit_percent / Decimal::ONE_HUNDRED
    }
}

const fn default_pending_trade_ttl_secs() -> u64 {
    600
}

/// Breakeven trailing stop settings.
///
/// `percent` multiplies the fill price directly (0.002 means 0.2%), unlike the
/// `*_percent` fields of [`TradingConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakevenConfig {
    pub enabled: bool,
    pub percent: Decimal,
    /// Consecutive favorable polls required before the stop is moved.
    pub window_size: u32,
    /// Maximum number of price polls before the watch gives up.
    pub place_duration: u32,
    pub poll_interval_ms: u64,
}

impl Default for BreakevenConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            percent: Decimal::ZERO,
            window_size: 5,
            place_duration: 300,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub max_concurrent_lookups: usize,
    pub top_n: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_lookups: 10,
            top_n: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub ping_interval_secs: u64,
    /// Connections older than this are recycled on the next health check.
    pub max_age_secs: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 10,
            max_age_secs: 8 * 60 * 60,
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub timeout_secs: u64,
    pub recv_window_ms: u64,
    pub requests_per_second: u32,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            recv_window_ms: 5_000,
            requests_per_second: 50,
        }
    }
}

impl AppConfig {
    /// Returns the key pair for the configured environment.
    #[must_use]
    pub fn active_credentials(&self) -> ApiCredentials {
        match self.environment {
            Environment::Mainnet => ApiCredentials {
                api_key: self.credentials.api_key.clone(),
                secret: self.credentials.hmac_secret.clone(),
            },
            Environment::Testnet => ApiCredentials {
                api_key: self.credentials.test_api_key.clone(),
                secret: self.credentials.test_hmac_secret.clone(),
            },
        }
    }

    /// Checks the numeric preconditions the strategy depends on.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let creds = self.active_credentials();
        if creds.api_key.is_empty() || creds.secret.is_empty() {
            bail!(
                "credentials for {:?} are missing (api key and hmac secret are required)",
                self.environment
            );
        }

        let trading = &self.trading;
        ensure!(trading.margin > Decimal::ZERO, "margin is required and must be positive");
        ensure!(trading.leverage > 0, "leverage is required and must be positive");
        ensure!(
            trading.min_funding_rate_percent >= Decimal::ZERO,
            "min_funding_rate_percent must not be negative"
        );
        ensure!(trading.stop_percent >= Decimal::ZERO, "stop_percent must not be negative");
        ensure!(
            trading.take_profit_percent >= Decimal::ZERO,
            "take_profit_percent must not be negative"
        );

        if self.breakeven.enabled {
            ensure!(self.breakeven.window_size > 0, "breakeven.window_size must be positive");
            ensure!(
                self.breakeven.place_duration > 0,
                "breakeven.place_duration must be positive"
            );
            ensure!(
                self.breakeven.percent >= Decimal::ZERO,
                "breakeven.percent must not be negative"
            );
        }

        ensure!(
            self.scanner.max_concurrent_lookups > 0,
            "scanner.max_concurrent_lookups must be positive"
        );
        ensure!(self.scanner.top_n > 0, "scanner.top_n must be positive");
        ensure!(
            self.rest.requests_per_second > 0,
            "rest.requests_per_second must be positive"
        );

        Ok(())
    }
}
