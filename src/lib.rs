//! # Gasless Relayer
//!
//! A relay gateway for gasless token transfers. Users sign an off-chain
//! EIP-3009 transfer authorization; this service validates it, guards the
//! nonce against replay, and forwards it to an upstream relayer that pays
//! the execution cost. A fleet monitor tracks the self-funded fallback
//! wallets when the service must pay gas itself.
//!
//! ## Quick Start
//! ```bash
//! cargo run --bin gasless-relayer
//! ```
//!
//! ## Endpoints
//! - `POST /relay` - Validate and forward a signed transfer authorization
//! - `GET /status/{id}` - Poll submission status from the upstream relayer
//! - `GET /health` - Health check with counters
//! - `GET /metrics` - Prometheus metrics

pub mod authorization;
pub mod config;
mod error;
pub mod fleet;
pub mod gateway;
mod handlers;
pub mod metrics;
mod middleware;
pub mod nonce_guard;
pub mod rate_limit;
mod response;
mod router;
pub mod signer;
mod state;
pub mod upstream;

pub use config::Config;
pub use error::Error;
pub use router::create as create_router;
pub use state::AppState;
