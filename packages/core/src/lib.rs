//! keyvault-sync - Synchronize, list and diff secrets across Azure Key Vaults.
//!
//! Every command fans independent remote operations out over a bounded
//! worker pool ([`fanout`]) and folds the per-item outcomes into a report
//! ([`report`]), so one failing vault or secret never hides the others.

pub mod cancel;
pub mod cloud;
pub mod config;
pub mod diff;
pub mod error;
pub mod fanout;
pub mod listing;
pub mod report;
pub mod source;
pub mod sync;

pub use error::{Error, Result};
