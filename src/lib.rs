//! chatrelay streams chat completions from an upstream LLM API through a
//! small HTTP relay, and consumes that stream on the client side.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation model, event-stream decoding, the relay
//!   endpoint, the reconnecting stream consumer, and configuration.
//! - [`api`] defines the wire payloads exchanged with the relay and with the
//!   upstream providers.
//! - [`cli`] parses arguments, initialises tracing, and runs the `serve`,
//!   `say`, `chat` and `config` commands.
//! - [`utils`] holds URL helpers and the transcript log.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
