//! The Rust SDK for FeatureGuards, a feature toggle service.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that checks whether a feature toggle is on for a set of
//! caller-supplied [`Attributes`]. The client keeps a local copy of all toggles, so checks are
//! cheap and never touch the network.
//!
//! [`Client::start`] spawns a background [`SyncThread`] that authenticates with the API key,
//! fetches the current toggles and then listens for updates, refreshing tokens and reconnecting
//! with backoff as needed.
//!
//! Toggles are either plain on/off switches or percentage rollouts. Both kinds support an
//! allow-list of rules that force the toggle on and a deny-list that forces it off. Sticky
//! percentage rollouts hash a caller attribute, so the same caller always gets the same outcome,
//! here and in every other FeatureGuards SDK.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! [`Client::is_on`] never fails: a missing or malformed toggle logs a warning and returns the
//! default configured with [`ClientConfig::defaults`]. Use [`Client::try_is_on`] to see the
//! error.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages under the `featureguards` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into SDK operations.
//!
//! # Examples
//!
//! ```no_run
//! # use featureguards::{Attributes, ClientConfig};
//! let mut config = ClientConfig::from_api_key("api-key");
//! config.defaults([("NEW_CHECKOUT", false)]);
//! let client = config.to_client()?;
//! client.start()?;
//!
//! let attributes = [("user_id".to_owned(), 123i64.into())]
//!     .into_iter()
//!     .collect::<Attributes>();
//! if client.is_on("NEW_CHECKOUT", Some(&attributes)) {
//!     // ...
//! }
//! client.shutdown()?;
//! # Ok::<(), featureguards::Error>(())
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod attributes;
mod backoff;
mod client;
mod config;
mod error;
mod eval;
mod http_transport;
mod rules;
mod sharder;
mod sync_thread;
mod toggle;
mod toggle_store;
mod token;
mod transport;

pub use attributes::{AttributeValue, Attributes};
pub use backoff::BackoffConfig;
pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result, ValidationError};
pub use http_transport::HttpTransport;
pub use sync_thread::SyncThread;
pub use toggle::*;
pub use transport::{AuthTokens, ToggleStream, TogglesPayload, Transport};
