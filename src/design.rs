//! Design documents: fingerprinting, lazy installation and stale-version
//! reaping.
//!
//! A design document lives on the server under `_design/<fingerprint>`,
//! where the fingerprint is the lowercase hex MD5 of its canonical JSON
//! encoding. View queries target that path directly; a 404 means the
//! current fingerprint was never installed, so the manager PUTs the
//! document (a 409 means a concurrent installer won), retries the original
//! query exactly once, and then sweeps obsolete `_design/*` versions in a
//! detached best-effort task.

use crate::client::ClientInner;
use crate::constants;
use crate::error::Error;
use crate::events::{EventSender, RequestEvent, RequestHandle};
use crate::options::RequestOptions;
use crate::pipeline;
use crate::query::Query;
use indexmap::IndexMap;
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// One view: map function source plus optional reduce.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ViewDefinition {
    pub map: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce: Option<String>,
}

/// A design document: named views whose map/reduce functions are held as
/// source text. Immutable after client construction.
#[derive(Debug, Clone, Serialize)]
pub struct DesignDocument {
    pub language: String,
    pub views: IndexMap<String, ViewDefinition>,
}

impl Default for DesignDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl DesignDocument {
    #[must_use]
    pub fn new() -> Self {
        Self {
            language: constants::VIEW_LANGUAGE.to_string(),
            views: IndexMap::new(),
        }
    }

    /// Add a view with its map function source and optional reduce source
    #[must_use]
    pub fn with_view(
        mut self,
        name: impl Into<String>,
        map: impl Into<String>,
        reduce: Option<&str>,
    ) -> Self {
        self.views.insert(
            name.into(),
            ViewDefinition {
                map: map.into(),
                reduce: reduce.map(str::to_string),
            },
        );
        self
    }

    /// Lowercase hex MD5 of the canonical JSON encoding.
    ///
    /// The canonical form is the serde serialisation with views in
    /// insertion order, so the fingerprint is stable for a fixed document
    /// and changes whenever any function source changes.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self)
            .expect("serializing a design document should never fail");
        format!("{:x}", md5::compute(canonical))
    }
}

/// A query against a view of the configured design document.
#[derive(Debug, Default)]
pub struct ViewQuery {
    pub view: String,
    /// Run the result through a `_list` function of the same document.
    pub list: Option<String>,
    pub options: RequestOptions,
}

impl ViewQuery {
    #[must_use]
    pub fn new(view: impl Into<String>) -> Self {
        Self {
            view: view.into(),
            list: None,
            options: RequestOptions::new(),
        }
    }

    #[must_use]
    pub fn with_list(mut self, list: impl Into<String>) -> Self {
        self.list = Some(list.into());
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// An ad-hoc map/reduce POSTed to `_temp_view`, not stored on the server.
#[derive(Debug, Default)]
pub struct TemporaryView {
    pub map: String,
    pub reduce: Option<String>,
    /// Present only to be rejected: list functions require a stored
    /// design document.
    pub list: Option<String>,
    pub options: RequestOptions,
}

impl TemporaryView {
    #[must_use]
    pub fn new(map: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            reduce: None,
            list: None,
            options: RequestOptions::new(),
        }
    }

    #[must_use]
    pub fn with_reduce(mut self, reduce: impl Into<String>) -> Self {
        self.reduce = Some(reduce.into());
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

fn spawn_pipeline(client: &Arc<ClientInner>, options: RequestOptions) -> RequestHandle {
    let (tx, mut handle) = RequestHandle::channel();
    let task = tokio::spawn(pipeline::run(Arc::clone(client), options, tx));
    handle.bind(task.abort_handle());
    handle
}

/// Deliver one event to the caller, stripping the view ETag when the
/// client does not trust them.
fn deliver(event: RequestEvent, events: &EventSender, trust_view_etags: bool) {
    match event {
        RequestEvent::Response(mut envelope) if !trust_view_etags => {
            envelope.cache_info.headers.etag = None;
            events.send(RequestEvent::Response(envelope));
        }
        other => events.send(other),
    }
}

async fn forward_all(handle: &mut RequestHandle, events: &EventSender, trust_view_etags: bool) {
    while let Some(event) = handle.recv().await {
        deliver(event, events, trust_view_etags);
    }
}

/// Drive a design-document view query, recovering from a cold cache.
///
/// The first dispatch runs through a small interceptor: `request` events
/// pass through while waiting; the first decisive event either triggers
/// the install-and-retry path (a NotFound error) or flips delivery to
/// plain pass-through for the rest of the sequence. At most one reinstall
/// happens per invocation — errors from the retried query surface as-is.
pub(crate) async fn run_view_query(
    client: Arc<ClientInner>,
    query: ViewQuery,
    fingerprint: String,
    events: EventSender,
) {
    let ViewQuery {
        view,
        list,
        mut options,
    } = query;

    let path = list.map_or_else(
        || {
            format!(
                "{}{}/{}/{}",
                constants::DESIGN_DOC_PREFIX,
                fingerprint,
                constants::VIEW_SEGMENT,
                view
            )
        },
        |list| {
            format!(
                "{}{}/{}/{}/{}",
                constants::DESIGN_DOC_PREFIX,
                fingerprint,
                constants::LIST_SEGMENT,
                list,
                view
            )
        },
    );
    options.path = Some(path);
    if options.method.is_none() {
        options.method = Some(Method::GET);
    }
    // Server-side view caches have been known to serve stale ETags; when
    // they are not trusted, conditional requests must not carry one.
    if !client.trust_view_etags {
        options.remove_header(constants::HEADER_IF_NONE_MATCH);
    }

    let retry_options = options.duplicate();
    let mut first_attempt = spawn_pipeline(&client, options);

    loop {
        match first_attempt.recv().await {
            Some(RequestEvent::Request(descriptor)) => {
                events.send(RequestEvent::Request(descriptor));
            }
            Some(RequestEvent::Error(err)) if err.is_not_found() => {
                // Cold cache for this fingerprint: install, then retry the
                // original query exactly once.
                match install(&client, &fingerprint).await {
                    Ok(()) => {
                        let mut retry = spawn_pipeline(&client, retry_options);
                        forward_all(&mut retry, &events, client.trust_view_etags).await;
                    }
                    Err(err) => events.send(RequestEvent::Error(err)),
                }
                return;
            }
            Some(event) => {
                deliver(event, &events, client.trust_view_etags);
                forward_all(&mut first_attempt, &events, client.trust_view_etags).await;
                return;
            }
            None => return,
        }
    }
}

/// PUT the design document under its fingerprint. A 409 means a
/// concurrent installer already won and counts as success. The caller's
/// continuation runs before the stale-version sweep, which is detached
/// and best-effort.
async fn install(client: &Arc<ClientInner>, fingerprint: &str) -> Result<(), Error> {
    let design = client
        .design_document
        .as_ref()
        .ok_or_else(|| Error::missing_design_document())?;
    let document_id = format!("{}{}", constants::DESIGN_DOC_PREFIX, fingerprint);
    tracing::debug!(document = %document_id, "installing design document");

    let options = RequestOptions::put(document_id.clone()).with_body(serde_json::to_value(design)?);
    match spawn_pipeline(client, options).wait().await {
        Ok(_) => {}
        Err(err) if err.is_conflict() => {
            tracing::debug!(document = %document_id, "concurrent install won the race");
        }
        Err(err) => return Err(err),
    }

    tokio::spawn(reap_stale_versions(Arc::clone(client), document_id));
    Ok(())
}

/// Delete every `_design/*` document whose id differs from `keep_id`,
/// using the revision from the `_all_docs` listing. Failures are logged
/// and swallowed.
async fn reap_stale_versions(client: Arc<ClientInner>, keep_id: String) {
    let listing_query = Query::pairs()
        .with("startkey", constants::DESIGN_DOC_STARTKEY)
        .with("endkey", constants::DESIGN_DOC_ENDKEY);
    let options = RequestOptions::get(constants::ALL_DOCS_PATH).with_query(listing_query);

    let listing = match spawn_pipeline(&client, options).wait().await {
        Ok(envelope) => envelope.body.unwrap_or(Value::Null),
        Err(err) => {
            tracing::warn!(error = %err, "listing design documents failed");
            return;
        }
    };

    let Some(rows) = listing.get("rows").and_then(Value::as_array) else {
        return;
    };
    for row in rows {
        let Some(id) = row.get("id").and_then(Value::as_str) else {
            continue;
        };
        if id == keep_id {
            continue;
        }
        let Some(rev) = row
            .get("value")
            .and_then(|value| value.get("rev"))
            .and_then(Value::as_str)
        else {
            continue;
        };

        tracing::debug!(document = id, rev, "deleting stale design document");
        // CouchDB expects the rev bare, not JSON-quoted
        let options = RequestOptions::delete(id)
            .with_query(Query::Raw(format!("rev={}", urlencoding::encode(rev))));
        if let Err(err) = spawn_pipeline(&client, options).wait().await {
            tracing::warn!(document = id, error = %err, "deleting stale design document failed");
        }
    }
}

/// Build the `_temp_view` request body.
#[must_use]
pub(crate) fn temporary_view_body(view: &TemporaryView, language: &str) -> Value {
    let mut body = json!({
        "language": language,
        "map": view.map,
    });
    if let Some(reduce) = &view.reduce {
        body["reduce"] = Value::String(reduce.clone());
    }
    body
}
