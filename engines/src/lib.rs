//! Engine adapters: one uniform capability interface over two wildly
//! different wire protocols. All protocol detail stays behind the adapters;
//! the orchestrator only ever sees `ScanJob` state.

pub mod adapter;
pub mod error;
pub mod jplag;
pub mod languages;
pub mod moss;

pub use adapter::{EngineAdapter, ScanContext};
pub use error::EngineError;
pub use jplag::{JplagAdapter, JplagConfig};
pub use languages::Language;
pub use moss::{MossAdapter, MossConfig, ProxyConfig};
pub use store::EngineName;
