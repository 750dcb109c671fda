//! Davenport is a client library for CouchDB-style document databases.
//!
//! It wraps a pooled HTTP(S) transport with four pieces of machinery:
//!
//! 1. A URL templating engine that expands `{name}` and `{…expr…}`
//!    placeholders against per-call and per-client scopes.
//! 2. A request pipeline that composes headers, serialises bodies, retries
//!    transport failures with body-safety constraints and maps every failure
//!    into a typed error.
//! 3. A streaming line-oriented parser that turns a CouchDB view response
//!    into a metadata event plus row events without buffering the body.
//! 4. A design-document manager that lazily installs a fingerprinted view
//!    document when the server reports it missing, reaps stale fingerprints
//!    and transparently retries the original query.
//!
//! The entry point is [`Client`], built from a [`ClientConfig`]:
//!
//! ```no_run
//! use davenport::{Client, ClientConfig, RequestOptions};
//!
//! # async fn example() -> Result<(), davenport::Error> {
//! let client = Client::new(ClientConfig::new("http://localhost:5984/contacts"))?;
//! let envelope = client.request(RequestOptions::get("by-name")).wait().await?;
//! println!("{:?}", envelope.body);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod body;
pub mod client;
pub mod config;
pub mod constants;
pub mod design;
pub mod error;
pub mod events;
pub mod options;
pub mod pipeline;
pub mod query;
pub mod retry;
pub mod stream;
pub mod template;
pub mod tls;

pub use body::Body;
pub use client::Client;
pub use config::{ClientConfig, PreprocessHook};
pub use design::{DesignDocument, TemporaryView, ViewDefinition, ViewQuery};
pub use error::{Error, TransportKind};
pub use events::{
    CacheHeaders, CacheInfo, LifecycleEvent, RequestDescriptor, RequestEvent, RequestHandle,
    ResponseEnvelope,
};
pub use options::RequestOptions;
pub use query::{Query, QueryValue};
pub use retry::RetryConfig;
pub use template::PlaceholderValue;
pub use tls::TlsItem;
