//! Kite Connect integration: REST client, order gateway, instrument dump,
//! polling chain feed, and a paper broker for dry runs.

pub mod auth;
pub mod client;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod instruments;
pub mod paper;
pub mod types;

pub use auth::KiteCredentials;
pub use client::KiteClient;
pub use error::{KiteError, Result};
pub use feed::{QuoteChainFeed, QuoteFeedConfig};
pub use instruments::{parse_dump, ChainIndex, StrikeRow};
pub use paper::{PaperAction, PaperFeed, PaperGateway};
pub use types::{Instrument, Session};
