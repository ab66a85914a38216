// Adapters layer: concrete implementations of the domain ports.

pub mod encoder;
pub mod observer;
pub mod storage;

pub use encoder::SymbolEncoder;
pub use observer::{NoopObserver, TracingObserver};
pub use storage::LocalStorage;
