pub mod config;
pub mod config_loader;
pub mod events;
pub mod market;
pub mod position;
pub mod tick;
pub mod traits;

pub use config::{
    ApiCredentials, AppConfig, BreakevenConfig, ConnectionConfig, CredentialsConfig, Environment,
    MarginMode, RestConfig, ScannerConfig, TradingConfig,
};
pub use config_loader::ConfigLoader;
pub use events::{OrderKind, OrderRequest, OrderStatus, OrderType, OrderUpdate, Side, StreamEvent};
pub use market::{FundingSnapshot, Instrument, RankedCandidate, ScanOutcome};
pub use position::{PendingTrade, PendingTradeSlot, ProtectiveOrderPair};
pub use tick::{format_decimal, truncate_to_step};
pub use traits::{AccountGateway, ConnectionHealth, MarketDataGateway, OrderGateway};
