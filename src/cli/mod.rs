//! Command-line interface parsing and handling
//!
//! `serve` runs the relay; `say` and `chat` are line-oriented clients of a
//! running relay; `config` shows or initialises the config file.

pub mod chat;
pub mod render;
pub mod say;
pub mod serve;
pub mod show_config;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::core::chat_stream::{ConsumerConfig, RequestBinding};
use crate::core::config::Config;
use crate::core::provider::ProviderKind;

/// Filter used for `serve` when `RUST_LOG` is unset.
pub const SERVE_LOG_FILTER: &str = "info,chatrelay=debug";
/// Filter used for the client commands when `RUST_LOG` is unset.
pub const CLIENT_LOG_FILTER: &str = "warn";
/// Environment variable holding the key the clients send as `x-api-key`.
pub const CLIENT_API_KEY_ENV: &str = "CHATRELAY_API_KEY";

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(version)]
#[command(about = "Streaming chat relay and terminal client")]
#[command(
    long_about = "chatrelay forwards a conversation to an upstream completion API and streams \
the reply back as server-sent events. The same binary includes simple terminal clients \
that talk to a running relay and reconnect when the stream drops.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY           Server-side key when the relay runs with --env-key\n\
  ANTHROPIC_API_KEY        Same, for the anthropic-complete provider\n\
  CHATRELAY_API_KEY        Key the clients send to the relay\n\
  CHATRELAY_UPSTREAM_URL   Upstream API base URL (falls back to OPENAI_BASE_URL)\n\
  CHATRELAY_MODEL          Upstream model\n\
  CHATRELAY_BIND           Relay listen address\n\
  CHATRELAY_RELAY_URL      Relay endpoint used by the clients\n\
  RUST_LOG                 Log filter"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of the platform default
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay server
    Serve(ServeArgs),
    /// Send one message and print the streamed reply
    Say {
        #[command(flatten)]
        client: ClientArgs,
        /// Message to send
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// Interactive conversation on stdin/stdout
    Chat {
        #[command(flatten)]
        client: ClientArgs,
        /// Append the transcript to this file
        #[arg(short = 'l', long)]
        log: Option<String>,
    },
    /// Print the effective configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

#[derive(clap::Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Address to listen on, e.g. 127.0.0.1:3000
    #[arg(short = 'b', long)]
    pub bind: Option<String>,
    /// Upstream dialect: openai-chat or anthropic-complete
    #[arg(short = 'p', long)]
    pub provider: Option<ProviderKind>,
    /// Upstream model
    #[arg(short = 'm', long)]
    pub model: Option<String>,
    /// Upstream API base URL
    #[arg(long)]
    pub upstream_url: Option<String>,
    /// Use the server's own key from the environment instead of x-api-key
    #[arg(long)]
    pub env_key: bool,
    /// Answer upstream failures with the upstream status instead of 400
    #[arg(long)]
    pub forward_upstream_status: bool,
}

#[derive(clap::Args, Debug, Default, Clone)]
pub struct ClientArgs {
    /// Relay endpoint URL
    #[arg(long)]
    pub relay_url: Option<String>,
    /// Sampling temperature between 0 and 1
    #[arg(short = 't', long)]
    pub temperature: Option<f64>,
    /// Upstream model to ask the relay for
    #[arg(short = 'm', long)]
    pub model: Option<String>,
    /// Dialect of the frames the relay forwards
    #[arg(short = 'p', long)]
    pub provider: Option<ProviderKind>,
    /// Send the request as GET query parameters
    #[arg(long)]
    pub get: bool,
    /// Give up after this many reconnects
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

impl ClientArgs {
    /// Folds the flags into `config`; flags win over file and environment.
    pub fn apply(&self, config: &mut Config) {
        let client = &mut config.client;
        if let Some(url) = &self.relay_url {
            client.relay_url = url.clone();
        }
        if let Some(temperature) = self.temperature {
            client.temperature = temperature;
        }
        if let Some(model) = &self.model {
            client.model = Some(model.clone());
        }
        if let Some(provider) = self.provider {
            client.provider = provider;
        }
        if self.get {
            client.method = RequestBinding::Get;
        }
        if let Some(max_attempts) = self.max_attempts {
            client.max_attempts = Some(max_attempts);
        }
    }

    pub fn consumer_config(&self, config: &Config) -> ConsumerConfig {
        let credential = std::env::var(CLIENT_API_KEY_ENV).ok();
        ConsumerConfig::from_client_config(&config.client, credential)
    }
}

pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());

    match args.command {
        Commands::Serve(serve_args) => {
            init_tracing(SERVE_LOG_FILTER);
            serve::run_serve(config, serve_args).await
        }
        Commands::Say { client, prompt } => {
            init_tracing(CLIENT_LOG_FILTER);
            client.apply(&mut config);
            say::run_say(&config, client.consumer_config(&config), prompt).await
        }
        Commands::Chat { client, log } => {
            init_tracing(CLIENT_LOG_FILTER);
            client.apply(&mut config);
            chat::run_chat(&config, client.consumer_config(&config), log).await
        }
        Commands::Config { init, force } => {
            init_tracing(CLIENT_LOG_FILTER);
            show_config::run_config(&config, args.config.as_deref(), init, force)
        }
    }
}

#[cfg(test)]
mod tests;
