//! URL templating and placeholder engine.
//!
//! Expands every `{…}` hole in a template against two scopes: the per-call
//! request options first, then the per-client placeholder map. A simple
//! `{word}` resolves by lookup (dynamic resolvers are invoked with the
//! request options and the placeholder name); anything else is an
//! expression evaluated by the interpreter in [`expr`]. Placeholders with
//! no binding in either scope stay in the URL literally, braces included.

pub mod expr;

use crate::error::Error;
use crate::options::RequestOptions;
use expr::Expr;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// A per-client placeholder binding: either a fixed value or a resolver
/// invoked with `(request_options, placeholder_name)` on every expansion.
#[derive(Clone)]
pub enum PlaceholderValue {
    Constant(Value),
    Dynamic(Arc<dyn Fn(&RequestOptions, &str) -> Value + Send + Sync>),
}

impl std::fmt::Debug for PlaceholderValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant(value) => write!(f, "Constant({value})"),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<Value> for PlaceholderValue {
    fn from(value: Value) -> Self {
        Self::Constant(value)
    }
}

impl From<&str> for PlaceholderValue {
    fn from(value: &str) -> Self {
        Self::Constant(Value::String(value.to_string()))
    }
}

impl From<String> for PlaceholderValue {
    fn from(value: String) -> Self {
        Self::Constant(Value::String(value))
    }
}

impl From<i64> for PlaceholderValue {
    fn from(value: i64) -> Self {
        Self::Constant(Value::from(value))
    }
}

impl From<i32> for PlaceholderValue {
    fn from(value: i32) -> Self {
        Self::Constant(Value::from(value))
    }
}

impl From<bool> for PlaceholderValue {
    fn from(value: bool) -> Self {
        Self::Constant(Value::Bool(value))
    }
}

/// Placeholders may nest one level of `{word}` inside an expression.
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{((?:[^{}]+|\{\w+\})*)\}").expect("placeholder regex is valid")
    })
}

/// Compiled expressions, memoised by source text for the client lifetime.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    compiled: Mutex<HashMap<String, Arc<Expr>>>,
}

impl ExpressionCache {
    /// Compile (or fetch the memoised) expression for `source`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for syntactically unsupported expressions.
    pub fn compile(&self, source: &str) -> Result<Arc<Expr>, Error> {
        let mut compiled = self
            .compiled
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(expr) = compiled.get(source) {
            return Ok(Arc::clone(expr));
        }
        let expr = Arc::new(
            expr::compile(source)
                .map_err(|reason| Error::unsupported_expression(source, reason))?,
        );
        compiled.insert(source.to_string(), Arc::clone(&expr));
        Ok(expr)
    }
}

/// The pair of scopes a placeholder resolves against.
pub struct Scope<'a> {
    pub options: &'a RequestOptions,
    pub client: &'a IndexMap<String, PlaceholderValue>,
}

impl Scope<'_> {
    /// Per-call options first, then the per-client map. `None` means truly
    /// unbound — falsy values are still `Some`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.options.placeholders.get(name) {
            return Some(value.clone());
        }
        match self.client.get(name) {
            Some(PlaceholderValue::Constant(value)) => Some(value.clone()),
            Some(PlaceholderValue::Dynamic(resolve)) => Some(resolve(self.options, name)),
            None => None,
        }
    }
}

fn is_simple_name(content: &str) -> bool {
    !content.is_empty()
        && content
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// String coercion for substituted values: strings go in bare, everything
/// else via its JSON rendering (`null` included).
fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Expand every placeholder in `template` against `scope`.
///
/// # Errors
///
/// Returns `InvalidConfig` when an expression placeholder fails to compile.
/// Base-URL templates are pre-validated at client construction, so this is
/// unreachable for configured URLs.
pub fn expand(template: &str, scope: &Scope<'_>, cache: &ExpressionCache) -> Result<String, Error> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder_regex().captures_iter(template) {
        let (Some(whole), Some(content)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        if is_simple_name(content.as_str()) {
            match scope.lookup(content.as_str()) {
                Some(value) => out.push_str(&coerce(&value)),
                // Unbound placeholders stay literal, braces included
                None => out.push_str(whole.as_str()),
            }
        } else {
            let compiled = cache.compile(content.as_str())?;
            let value = compiled.eval(&|name| scope.lookup(name));
            out.push_str(&coerce(&value));
        }
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Pre-compile every expression placeholder in `template`, surfacing
/// unsupported syntax at client construction time.
///
/// # Errors
///
/// Returns `InvalidConfig` for the first malformed expression.
pub fn validate(template: &str, cache: &ExpressionCache) -> Result<(), Error> {
    for caps in placeholder_regex().captures_iter(template) {
        if let Some(content) = caps.get(1) {
            if !is_simple_name(content.as_str()) {
                cache.compile(content.as_str())?;
            }
        }
    }
    Ok(())
}
