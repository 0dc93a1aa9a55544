//! Testing Utilities Module
//!
//! In-memory chains and fixtures for exercising the relay pipeline without a
//! node. Available to this crate's tests and, with the `testing` feature, to
//! integration tests and downstream crates.
//!
//! ## Submodules
//!
//! - `mock_chains` - Scriptable source chain and recording destination chain
//! - `fixtures` - Sample events and a routing table

pub mod fixtures;
pub mod mock_chains;

pub use fixtures::*;
pub use mock_chains::*;
