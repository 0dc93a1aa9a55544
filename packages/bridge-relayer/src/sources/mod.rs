//! Source chain clients

pub mod evm;
pub mod substrate;

pub use evm::EvmSource;
pub use substrate::SubstrateSource;
