//! Engine Type Definitions
//!
//! - `common`: identifiers, directions, processing status
//! - `member`: referral forest nodes and rank snapshots
//! - `badge`: badge tiers and tokens
//! - `order`: orders carrying commission
//! - `ledger`: earnings, pool entries, transactions, packages

pub mod badge;
pub mod common;
pub mod ledger;
pub mod member;
pub mod order;

pub use badge::*;
pub use common::*;
pub use ledger::*;
pub use member::*;
pub use order::*;
