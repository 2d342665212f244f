//! Bybit V5 integration for the funding-rate sniper.
//!
//! This crate provides:
//! - HMAC-SHA256 signing for REST calls and stream authentication
//! - A rate-limited REST gateway for account setup, instrument metadata and funding snapshots
//! - A supervised streaming connection used for order entry and fill notifications
//!
//! # Example
//!
//! ```ignore
//! use funding_sniper_bybit::{Endpoints, RequestSigner, StreamConnection, StreamRole, StreamSettings};
//!
//! let endpoints = Endpoints::testnet();
//! let signer = std::sync::Arc::new(RequestSigner::new(&credentials, 5000));
//! let settings = StreamSettings::new(StreamRole::FillFeed, &endpoints.private_ws_url, &config.connection);
//! let (fills, mut events) = StreamConnection::connect(settings, signer);
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod client;
pub mod endpoints;
pub mod error;
pub mod messages;
pub mod signing;
pub mod websocket;

pub use client::BybitRestClient;
pub use endpoints::Endpoints;
pub use error::{BybitError, Result};
pub use signing::RequestSigner;
pub use funding_sniper_core::StreamEvent;
pub use websocket::{ConnectionState, StreamConnection, StreamRole, StreamSettings};
