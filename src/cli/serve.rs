use std::error::Error;

use crate::cli::ServeArgs;
use crate::core::config::{Config, RelayConfig};
use crate::core::relay::{self, CredentialMode};

/// Applies the `serve` flags on top of the file and environment settings.
pub fn relay_config(config: &Config, args: &ServeArgs) -> RelayConfig {
    let mut relay = config.relay.clone();
    if let Some(bind) = &args.bind {
        relay.bind = bind.clone();
    }
    if let Some(provider) = args.provider {
        relay.provider = provider;
    }
    if let Some(model) = &args.model {
        relay.model = Some(model.clone());
    }
    if let Some(url) = &args.upstream_url {
        relay.upstream_url = Some(url.clone());
    }
    if args.env_key {
        relay.credential = CredentialMode::Environment;
    }
    if args.forward_upstream_status {
        relay.forward_upstream_status = true;
    }
    relay
}

pub async fn run_serve(config: Config, args: ServeArgs) -> Result<(), Box<dyn Error>> {
    relay::serve(relay_config(&config, &args)).await?;
    Ok(())
}
