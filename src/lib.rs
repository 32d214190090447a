//! PropCard Library
//!
//! Card construction and portfolio optimization for multi-leg player prop entries:
//! exact payout math, a local or remote EV provider, budgeted card search,
//! correlation filtering, mean-variance Kelly sizing and greedy portfolio selection.

pub mod builder;
pub mod card;
pub mod config;
pub mod error;
pub mod ev_provider;
pub mod filters;
pub mod kelly;
pub mod payout;
pub mod pipeline;
pub mod portfolio;
pub mod types;

pub use error::{CoreError, CoreResult};
