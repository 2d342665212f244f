use funding_sniper_core::Environment;

/// Base URLs for every exchange-facing client.
///
/// Production and test wiring both go through this type, so tests can point
/// clients at local mock servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub rest_url: String,
    /// Order-entry stream (`order` role).
    pub trade_ws_url: String,
    /// Private account stream (`fill_feed` role).
    pub private_ws_url: String,
    /// Premium-index source for mark price and funding data.
    pub funding_feed_url: String,
}

impl Endpoints {
    #[must_use]
    pub fn mainnet() -> Self {
        Self {
            rest_url: "https://api.bybit.com".to_string(),
            trade_ws_url: "wss://stream.bybit.com/v5/trade".to_string(),
            private_ws_url: "wss://stream.bybit.com/v5/private".to_string(),
            funding_feed_url: "https://fapi.binance.com".to_string(),
        }
    }

    /// Testnet trading endpoints. Funding data always comes from the live feed,
    /// since testnet has no meaningful funding schedule.
    #[must_use]
    pub fn testnet() -> Self {
        Self {
            rest_url: "https://api-testnet.bybit.com".to_string(),
            trade_ws_url: "wss://stream-testnet.bybit.com/v5/trade".to_string(),
            private_ws_url: "wss://stream-testnet.bybit.com/v5/private".to_string(),
            funding_feed_url: "https://fapi.binance.com".to_string(),
        }
    }

    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Mainnet => Self::mainnet(),
            Environment::Testnet => Self::testnet(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_selects_endpoint_set() {
        assert_eq!(Endpoints::for_environment(Environment::Mainnet), Endpoints::mainnet());
        let testnet = Endpoints::for_environment(Environment::Testnet);
        assert!(testnet.rest_url.contains("testnet"));
        assert!(testnet.private_ws_url.ends_with("/v5/private"));
        assert_eq!(testnet.funding_feed_url, Endpoints::mainnet().funding_feed_url);
    }
}
