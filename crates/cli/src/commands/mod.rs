//! CLI subcommands and the client wiring they share.

pub mod balance;
pub mod run;
pub mod scan;

use anyhow::{Context, Result};
use funding_sniper_bybit::{BybitRestClient, Endpoints, RequestSigner};
use funding_sniper_core::{AppConfig, ConfigLoader};
use std::sync::Arc;

/// Everything a subcommand needs to talk to the exchange.
pub struct Exchange {
    pub config: AppConfig,
    pub endpoints: Endpoints,
    pub signer: Arc<RequestSigner>,
    pub rest: Arc<BybitRestClient>,
}

impl Exchange {
    /// Loads and validates `config_path`, then builds the signer and REST client
    /// for the configured environment.
    pub fn connect(config_path: &str) -> Result<Self> {
        let config = ConfigLoader::load(config_path)?;
        let endpoints = Endpoints::for_environment(config.environment);
        let signer = Arc::new(RequestSigner::new(
            &config.active_credentials(),
            config.rest.recv_window_ms,
        ));
        let rest = BybitRestClient::new(endpoints.clone(), Arc::clone(&signer), &config.rest)
            .context("failed to build REST client")?;

        tracing::info!(rest = %endpoints.rest_url, "exchange clients ready");

        Ok(Self {
            config,
            endpoints,
            signer,
            rest: Arc::new(rest),
        })
    }
}
