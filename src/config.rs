//! Client configuration.
//!
//! A [`ClientConfig`] names everything a client needs for its lifetime:
//! base URLs (round-robined), the optional design document, the retry
//! budget and delay schedule, TLS material and free-form placeholder
//! bindings. Construction of the client validates the whole record — bad
//! templates, reserved placeholder names and unreadable TLS files fail
//! before the first request.

use crate::design::DesignDocument;
use crate::events::RequestDescriptor;
use crate::retry::RetryConfig;
use crate::template::PlaceholderValue;
use crate::tls::TlsItem;
use indexmap::IndexMap;
use std::sync::Arc;

/// Hook applied to the wire-level request descriptor before dispatch.
pub type PreprocessHook = Arc<dyn Fn(&mut RequestDescriptor) + Send + Sync>;

pub struct ClientConfig {
    /// Base URLs, used round-robin. Trailing slashes are stripped.
    pub urls: Vec<String>,
    pub design_document: Option<DesignDocument>,
    /// When false, view-query ETags are dropped both ways. Default true.
    pub trust_view_etags: bool,
    /// Retry budget for transport failures. Default 0.
    pub num_retries: u32,
    /// Upper bound on pooled connections per host.
    pub max_sockets: Option<usize>,
    pub cert: Option<TlsItem>,
    pub key: Option<TlsItem>,
    pub ca: Vec<TlsItem>,
    /// When false, server certificates are not verified. Default true.
    pub reject_unauthorized: bool,
    /// Delay schedule between retry redispatches.
    pub retry: RetryConfig,
    /// Placeholder bindings available to every URL template. Keys must
    /// not shadow reserved configuration or operation names.
    pub placeholders: IndexMap<String, PlaceholderValue>,
    pub preprocess: Option<PreprocessHook>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("urls", &self.urls)
            .field("design_document", &self.design_document)
            .field("trust_view_etags", &self.trust_view_etags)
            .field("num_retries", &self.num_retries)
            .field("max_sockets", &self.max_sockets)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("placeholders", &self.placeholders)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Configuration for a single base URL
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_urls(vec![url.into()])
    }

    /// Configuration for a round-robined list of base URLs
    #[must_use]
    pub fn with_urls(urls: Vec<String>) -> Self {
        Self {
            urls,
            design_document: None,
            trust_view_etags: true,
            num_retries: 0,
            max_sockets: None,
            cert: None,
            key: None,
            ca: Vec::new(),
            reject_unauthorized: true,
            retry: RetryConfig::default(),
            placeholders: IndexMap::new(),
            preprocess: None,
        }
    }

    #[must_use]
    pub fn with_design_document(mut self, design_document: DesignDocument) -> Self {
        self.design_document = Some(design_document);
        self
    }

    #[must_use]
    pub const fn trust_view_etags(mut self, trust: bool) -> Self {
        self.trust_view_etags = trust;
        self
    }

    #[must_use]
    pub const fn with_num_retries(mut self, num_retries: u32) -> Self {
        self.num_retries = num_retries;
        self
    }

    #[must_use]
    pub const fn with_max_sockets(mut self, max_sockets: usize) -> Self {
        self.max_sockets = Some(max_sockets);
        self
    }

    #[must_use]
    pub fn with_cert(mut self, cert: impl Into<TlsItem>) -> Self {
        self.cert = Some(cert.into());
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<TlsItem>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add one CA certificate; may be called repeatedly
    #[must_use]
    pub fn with_ca(mut self, ca: impl Into<TlsItem>) -> Self {
        self.ca.push(ca.into());
        self
    }

    #[must_use]
    pub const fn reject_unauthorized(mut self, reject: bool) -> Self {
        self.reject_unauthorized = reject;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Bind a placeholder for URL templates; constant or dynamic
    #[must_use]
    pub fn with_placeholder(
        mut self,
        name: impl Into<String>,
        value: impl Into<PlaceholderValue>,
    ) -> Self {
        self.placeholders.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_preprocess(
        mut self,
        hook: impl Fn(&mut RequestDescriptor) + Send + Sync + 'static,
    ) -> Self {
        self.preprocess = Some(Arc::new(hook));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_contract() {
        let config = ClientConfig::new("http://localhost:5984/db");
        assert_eq!(config.urls, vec!["http://localhost:5984/db"]);
        assert!(config.trust_view_etags);
        assert_eq!(config.num_retries, 0);
        assert!(config.reject_unauthorized);
        assert!(config.max_sockets.is_none());
        assert!(config.design_document.is_none());
    }

    #[test]
    fn builder_collects_placeholders_in_order() {
        let config = ClientConfig::new("http://h/db")
            .with_placeholder("a", 1)
            .with_placeholder("b", "two");
        let names: Vec<&str> = config.placeholders.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
