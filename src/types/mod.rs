// ABOUTME: Validated value types shared across the crate.
// ABOUTME: Currently the host:port Endpoint used by tunnels, proxies and targets.

mod endpoint;

pub use endpoint::{Endpoint, EndpointError};
