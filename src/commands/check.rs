// ABOUTME: Check command implementation.
// ABOUTME: Validates the configuration offline and prints what would be used.

use sshlink::config::Config;
use sshlink::error::Result;
use sshlink::output::Output;
use sshlink::proxy::ProxyRoute;

pub fn check(config: &Config, output: Output) -> Result<()> {
    let client_config = config.client_config()?;

    if let Some(proxy) = &config.proxy {
        let route = ProxyRoute::parse(proxy)?;
        output.progress(&format!("  proxy: {}", route.proxy()));
    }
    if let Some(jump) = &config.jump {
        output.progress(&format!("  jump:  {}", jump));
    }
    if let Some(tunnel) = &config.tunnel {
        output.progress(&format!(
            "  tunnel: {} → {} via {}",
            tunnel.local, tunnel.remote, tunnel.relay
        ));
    }
    if client_config.credentials.is_none() {
        output.warning("no credentials configured; connecting will fail");
    }

    output.success(&format!(
        "{}@{}",
        client_config.user,
        client_config.target()
    ));
    Ok(())
}
