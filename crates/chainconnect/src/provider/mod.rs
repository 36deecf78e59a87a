//! Provider resolution: factories produce endpoints per chain, the fallback
//! policy composes them, and the resolver caches one handle per chain.
//!
//! ```text
//! ProviderFactory* ──▶ [ProviderConfig{priority}] ──▶ FallbackProvider
//!                                                           │
//!                      ProviderResolver cache ◀── ProviderHandle{chain_id, failure window}
//! ```

pub mod factories;
pub mod fallback;
pub mod handle;
pub mod resolver;

pub use factories::{
    AlchemyProvider, InfuraProvider, JsonRpcProvider, JsonRpcUrls, ProviderConfig, ProviderFactory,
    PublicProvider,
};
pub use fallback::FallbackProvider;
pub use handle::ProviderHandle;
pub use resolver::ProviderResolver;
