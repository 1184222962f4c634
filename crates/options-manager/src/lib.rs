//! Short-straddle session management.
//!
//! Sells an at-the-money call and put, protects each leg with a stop-loss
//! (and optionally a profit target), trails stops as premiums decay, and
//! squares off at the session exit time.
//!
//! - [`order::OrderHandle`] proxies one broker order
//! - [`position::Position`] places deduplicated orders for an instrument
//! - [`engine::StraddleEngine`] is the per-tick state machine
//! - [`service::execute`] drives the engine from a chain feed

pub mod chain;
pub mod engine;
pub mod error;
pub mod order;
pub mod position;
pub mod service;
pub mod stops;
pub mod targets;
pub mod types;

pub use engine::{LegState, StraddleEngine};
pub use error::EngineError;
pub use order::OrderHandle;
pub use position::{OrderContext, Position, ProductClass, ProductConfig};
pub use service::{decide, execute};
pub use types::{
    ExitReason, Leg, LegPhase, LegSummary, PricingRules, SessionReport, SessionWindow,
    StraddleConfig, TickAction,
};
