//! Centralized string constants for davenport
//!
//! This module contains commonly used string literals to:
//! - Reduce string duplication
//! - Improve maintainability
//! - Ensure consistency across the codebase

// HTTP Headers
pub const HEADER_ACCEPT: &str = "Accept";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_IF_NONE_MATCH: &str = "If-None-Match";

// Lowercase header name (for response-header lookups)
pub const HEADER_CONTENT_TYPE_LC: &str = "content-type";

// Cache validator headers surfaced verbatim on every response
pub const HEADER_LAST_MODIFIED: &str = "last-modified";
pub const HEADER_ETAG: &str = "etag";
pub const HEADER_EXPIRES: &str = "expires";
pub const HEADER_CACHE_CONTROL: &str = "cache-control";

// Content Types
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_JSON_SUFFIX: &str = "+json";

// CouchDB paths
pub const DESIGN_DOC_PREFIX: &str = "_design/";
pub const VIEW_SEGMENT: &str = "_view";
pub const LIST_SEGMENT: &str = "_list";
pub const TEMP_VIEW_PATH: &str = "_temp_view";
pub const ALL_DOCS_PATH: &str = "_all_docs";

// Key range covering every design document in `_all_docs`
pub const DESIGN_DOC_STARTKEY: &str = "_design/";
pub const DESIGN_DOC_ENDKEY: &str = "_design/~";

// Default language for design documents and temporary views
pub const VIEW_LANGUAGE: &str = "javascript";

// Placeholder substituted in TLS material filenames
pub const HOSTNAME_PLACEHOLDER: &str = "{hostname}";

/// Configuration and operation names that user placeholder bindings must not
/// shadow. Collisions fail client construction.
pub const RESERVED_NAMES: &[&str] = &[
    "url",
    "design_document",
    "trust_view_etags",
    "num_retries",
    "max_sockets",
    "cert",
    "key",
    "ca",
    "reject_unauthorized",
    "request",
    "query_design_document",
    "query_temporary_view",
    "init",
    "quit",
];
