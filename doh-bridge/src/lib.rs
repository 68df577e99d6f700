//! DNS-over-HTTPS resolver bridge.
//!
//! Exposes a local UDP endpoint that forwards raw DNS messages to a DoH
//! provider, plus the resolver strategies that point name lookups at it.

pub mod bridge;
pub mod provider;
pub mod resolve;

pub use bridge::ResolverBridge;
pub use provider::{Provider, ProviderConfig, Transport};
pub use resolve::{BridgeResolver, Resolve, SystemResolver};
