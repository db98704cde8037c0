//! The relay endpoint.
//!
//! Accepts a conversation from a browser or CLI client, forwards it to the
//! configured upstream provider with streaming enabled, and copies the
//! upstream event stream back byte for byte. The relay never holds more than
//! the request in flight.

mod error;
mod params;
mod server;


use serde::{Deserialize, Serialize};

pub use error::RelayError;
pub use params::{parse_temperature, validate, RawParams, RelayParams};
pub use server::{
    router, serve, RelayState, ServeError, CONVERSE_PATH, CREDENTIAL_HEADER,
    EVENT_STREAM_CONTENT_TYPE,
};

/// Where the relay gets the upstream credential from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMode {
    /// Each caller supplies its own key in the `x-api-key` header.
    #[default]
    Header,
    /// The relay uses its own key from the provider's environment variable.
    Environment,
}
