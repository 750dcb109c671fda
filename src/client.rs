//! The client facade.
//!
//! A [`Client`] is the long-lived binding to one logical database: it
//! holds the validated configuration, the round-robin URL ring, the
//! memoised template expressions, the design-document fingerprint and the
//! lazily created transport. All request methods return a
//! [`RequestHandle`] whose event sequence carries the outcome.

use crate::agent::{Agent, AgentSettings};
use crate::config::{ClientConfig, PreprocessHook};
use crate::constants;
use crate::design::{self, DesignDocument, TemporaryView, ViewQuery};
use crate::error::Error;
use crate::events::{LifecycleChannel, LifecycleEvent, RequestHandle};
use crate::options::RequestOptions;
use crate::pipeline;
use crate::retry::RetryConfig;
use crate::template::{self, ExpressionCache, PlaceholderValue};
use crate::tls::TlsMaterial;
use indexmap::IndexMap;
use reqwest::Method;
use std::sync::Arc;
use tokio::sync::broadcast;

use self::client_context::UrlRing;

pub(crate) mod client_context {
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Round-robin ring over the configured base URLs: an immutable list
    /// plus a monotone cursor, atomically advanced per request.
    #[derive(Debug)]
    pub struct UrlRing {
        urls: Vec<String>,
        cursor: AtomicUsize,
    }

    impl UrlRing {
        pub fn new(urls: Vec<String>) -> Self {
            Self {
                urls,
                cursor: AtomicUsize::new(0),
            }
        }

        /// The next base URL; sequential across overlapping calls
        pub fn next(&self) -> String {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            self.urls[index % self.urls.len()].clone()
        }
    }
}

/// Everything the pipeline needs, read-only after construction except for
/// the URL cursor and the agent cell.
pub(crate) struct ClientInner {
    pub urls: UrlRing,
    pub num_retries: u32,
    pub retry: RetryConfig,
    pub placeholders: IndexMap<String, PlaceholderValue>,
    pub expressions: ExpressionCache,
    pub design_document: Option<DesignDocument>,
    pub fingerprint: Option<String>,
    pub trust_view_etags: bool,
    pub agent: Agent,
    pub agent_settings: AgentSettings,
    pub lifecycle: LifecycleChannel,
    pub preprocess: Option<PreprocessHook>,
}

pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("fingerprint", &self.inner.fingerprint)
            .field("num_retries", &self.inner.num_retries)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Build a client from its configuration.
    ///
    /// # Errors
    ///
    /// Fails when no base URL is given, a placeholder shadows a reserved
    /// name, a base-URL expression does not parse, or TLS material cannot
    /// be resolved.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        if config.urls.is_empty() {
            return Err(Error::invalid_config("at least one base URL is required"));
        }
        let urls: Vec<String> = config
            .urls
            .iter()
            .map(|url| url.trim_end_matches('/').to_string())
            .collect();

        for name in config.placeholders.keys() {
            if constants::RESERVED_NAMES.contains(&name.as_str()) {
                return Err(Error::reserved_placeholder(name.as_str()));
            }
        }

        // Compile (and memoise) every expression placeholder up front so
        // malformed templates fail here, not mid-request.
        let expressions = ExpressionCache::default();
        for url in &urls {
            template::validate(url, &expressions)?;
        }

        let tls = TlsMaterial::resolve(config.cert.as_ref(), config.key.as_ref(), &config.ca)?;
        let fingerprint = config.design_document.as_ref().map(DesignDocument::fingerprint);

        Ok(Self {
            inner: Arc::new(ClientInner {
                urls: UrlRing::new(urls),
                num_retries: config.num_retries,
                retry: config.retry,
                placeholders: config.placeholders,
                expressions,
                design_document: config.design_document,
                fingerprint,
                trust_view_etags: config.trust_view_etags,
                agent: Agent::default(),
                agent_settings: AgentSettings {
                    tls,
                    max_sockets: config.max_sockets,
                    reject_unauthorized: config.reject_unauthorized,
                },
                lifecycle: LifecycleChannel::default(),
                preprocess: config.preprocess,
            }),
        })
    }

    /// Issue one request. The returned handle yields
    /// `request → response → (metadata? → row*)? → (end | error)`.
    #[must_use]
    pub fn request(&self, options: RequestOptions) -> RequestHandle {
        let (tx, mut handle) = RequestHandle::channel();
        let task = tokio::spawn(pipeline::run(Arc::clone(&self.inner), options, tx));
        handle.bind(task.abort_handle());
        handle
    }

    /// Query a view of the configured design document, installing the
    /// document on demand when the server reports it missing.
    ///
    /// # Errors
    ///
    /// Fails synchronously when no design document is configured or the
    /// view is not part of it. Wire failures surface on the handle.
    pub fn query_design_document(&self, query: ViewQuery) -> Result<RequestHandle, Error> {
        let design = self
            .inner
            .design_document
            .as_ref()
            .ok_or_else(Error::missing_design_document)?;
        if !design.views.contains_key(&query.view) {
            return Err(Error::unknown_view(&query.view));
        }
        let fingerprint = self
            .inner
            .fingerprint
            .clone()
            .ok_or_else(Error::missing_design_document)?;

        let (tx, mut handle) = RequestHandle::channel();
        let task = tokio::spawn(design::run_view_query(
            Arc::clone(&self.inner),
            query,
            fingerprint,
            tx,
        ));
        handle.bind(task.abort_handle());
        Ok(handle)
    }

    /// POST an ad-hoc map/reduce to `_temp_view`.
    ///
    /// # Errors
    ///
    /// Fails synchronously when a list function is requested — lists
    /// require a stored design document.
    pub fn query_temporary_view(&self, view: TemporaryView) -> Result<RequestHandle, Error> {
        if view.list.is_some() {
            return Err(Error::list_with_temporary_view());
        }
        let language = self
            .inner
            .design_document
            .as_ref()
            .map_or(constants::VIEW_LANGUAGE, |design| design.language.as_str());
        let body = design::temporary_view_body(&view, language);

        let mut options = view.options;
        options.method = Some(Method::POST);
        options.path = Some(constants::TEMP_VIEW_PATH.to_string());
        options.body = body.into();
        Ok(self.request(options))
    }

    /// PUT the base URL to create the database. An already-existing
    /// database (412 Precondition Failed) is success.
    ///
    /// # Errors
    ///
    /// Surfaces any other pipeline failure.
    pub async fn init(&self) -> Result<(), Error> {
        let handle = self.request(RequestOptions::new().with_method(Method::PUT));
        match handle.wait().await {
            Ok(_) => Ok(()),
            Err(err) if err.is_precondition_failed() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Release the pooled transport. Idempotent; a later request builds a
    /// fresh one.
    pub fn quit(&self) {
        self.inner.agent.release();
    }

    /// Subscribe to `request` / `successful_request` / `failed_request`
    /// lifecycle events, for logging and metrics.
    #[must_use]
    pub fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// The design-document fingerprint, when one is configured
    #[must_use]
    pub fn fingerprint(&self) -> Option<&str> {
        self.inner.fingerprint.as_deref()
    }
}
