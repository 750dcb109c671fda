//! The request pipeline.
//!
//! Drives one logical request end to end: base-URL rotation, templating,
//! path/query assembly, body serialisation, the preprocess hook, dispatch
//! over the pooled transport, transport-failure retries and response
//! classification. Every outcome surfaces as events on the request handle
//! plus exactly one `successful_request`/`failed_request` lifecycle event.
//!
//! Retries apply to transport failures only. Once response headers have
//! arrived the budget freezes: an HTTP error is an answer, not a failure
//! to ask. Stream bodies and streaming responses clamp the budget to zero
//! before the first byte is written.

use crate::body::PreparedBody;
use crate::client::ClientInner;
use crate::constants;
use crate::error::Error;
use crate::events::{
    CacheHeaders, CacheInfo, EventSender, LifecycleEvent, RequestDescriptor, RequestEvent,
    ResponseEnvelope,
};
use crate::options::RequestOptions;
use crate::retry;
use crate::stream;
use crate::template::{self, ExpressionCache, Scope};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::sync::Arc;

/// Drive one request to its terminal event.
pub(crate) async fn run(client: Arc<ClientInner>, mut options: RequestOptions, events: EventSender) {
    // The body is taken out before the placeholder scope borrows the
    // options; dynamic resolvers never see it.
    let body = std::mem::take(&mut options.body);
    let body_is_stream = body.is_stream();

    // 1. Round-robin base selection; the chosen base is pinned for every
    // retry of this request.
    let base = client.urls.next();

    // 2.–4. Template expansion, path, query.
    let url = {
        let scope = Scope {
            options: &options,
            client: &client.placeholders,
        };
        match build_url(&base, &options, &scope, &client.expressions) {
            Ok(url) => url,
            Err(err) => {
                fail(&client, &events, base, None, err, 0);
                return;
            }
        }
    };

    // 5. Body serialisation and the final header set.
    let mut prepared = match body.prepare() {
        Ok(prepared) => prepared,
        Err(err) => {
            fail(&client, &events, url, None, err, 0);
            return;
        }
    };

    let mut headers: Vec<(String, String)> = options
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    if let Some(content_type) = prepared.content_type() {
        if options.header(constants::HEADER_CONTENT_TYPE).is_none() {
            headers.push((
                constants::HEADER_CONTENT_TYPE.to_string(),
                content_type.to_string(),
            ));
        }
    }
    if options.header(constants::HEADER_ACCEPT).is_none() {
        headers.push((
            constants::HEADER_ACCEPT.to_string(),
            constants::CONTENT_TYPE_JSON.to_string(),
        ));
    }

    // 6. Effective retry budget. Stream bodies are not replayable and
    // streaming responses must not be re-requested mid-delivery.
    let mut retries_left = options.num_retries.unwrap_or(client.num_retries);
    if options.streaming || body_is_stream {
        retries_left = 0;
    }

    // 7. The preprocess hook sees the final wire-level descriptor.
    let mut descriptor = RequestDescriptor {
        method: options.effective_method(),
        url,
        headers,
    };
    if let Some(hook) = &client.preprocess {
        hook(&mut descriptor);
    }

    let transport = match client.agent.obtain(&client.agent_settings) {
        Ok(transport) => transport,
        Err(err) => {
            fail(&client, &events, descriptor.url, None, err, retries_left);
            return;
        }
    };

    // 8.–9. Dispatch, retrying transport failures against the same URL.
    let mut attempt: u32 = 0;
    let outcome = loop {
        client.lifecycle.emit(LifecycleEvent::Request {
            method: descriptor.method.clone(),
            url: descriptor.url.clone(),
        });
        events.send(RequestEvent::Request(descriptor.clone()));
        tracing::debug!(method = %descriptor.method, url = %descriptor.url, "dispatching");

        let mut builder = transport.request(descriptor.method.clone(), descriptor.url.clone());
        for (name, value) in &descriptor.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &mut prepared {
            PreparedBody::Empty => builder,
            PreparedBody::Bytes { bytes, .. } => builder.body(bytes.clone()),
            // The slot is always full here: stream bodies never retry
            PreparedBody::Stream(slot) => match slot.take() {
                Some(stream) => builder.body(stream),
                None => builder,
            },
        };

        match builder.send().await {
            Ok(response) => break Ok(response),
            Err(err) if retries_left > 0 => {
                retries_left -= 1;
                tracing::debug!(
                    url = %descriptor.url,
                    error = %err,
                    retries_left,
                    "transport error, redispatching"
                );
                tokio::time::sleep(retry::backoff_delay(&client.retry, attempt)).await;
                attempt += 1;
            }
            Err(err) => break Err(Error::from_transport(&err)),
        }
    };

    let response = match outcome {
        Ok(response) => response,
        Err(err) => {
            fail(&client, &events, descriptor.url, None, err, retries_left);
            return;
        }
    };

    // 10. Classification. Retries are frozen from here on.
    let status = response.status();
    let response_headers = response.headers().clone();
    let cache_info = extract_cache_info(status, &response_headers);

    if status.as_u16() >= 400 {
        // Drain the error body so the pooled connection can be reused
        let _ = response.bytes().await;
        let err = Error::http(status, descriptor.url.clone());
        fail(&client, &events, descriptor.url, Some(status), err, 0);
        return;
    }

    if status == StatusCode::NOT_MODIFIED {
        let _ = response.bytes().await;
        succeed(&client, &descriptor.url, status);
        events.send(RequestEvent::Response(ResponseEnvelope {
            status,
            headers: response_headers,
            cache_info,
            raw: Bytes::new(),
            body: None,
        }));
        events.send(RequestEvent::End);
        return;
    }

    if options.streaming {
        succeed(&client, &descriptor.url, status);
        events.send(RequestEvent::Response(ResponseEnvelope {
            status,
            headers: response_headers,
            cache_info,
            raw: Bytes::new(),
            body: None,
        }));
        stream::run(response.bytes_stream(), &events).await;
        return;
    }

    let raw = match response.bytes().await {
        Ok(raw) => raw,
        Err(err) => {
            let err = Error::from_transport(&err);
            fail(&client, &events, descriptor.url, Some(status), err, 0);
            return;
        }
    };

    let body = if is_json_content_type(cache_info.headers.content_type.as_deref()) {
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                let err =
                    Error::bad_gateway(format!("response declared JSON but failed to parse: {err}"));
                fail(&client, &events, descriptor.url, Some(status), err, 0);
                return;
            }
        }
    } else {
        None
    };

    succeed(&client, &descriptor.url, status);
    events.send(RequestEvent::Response(ResponseEnvelope {
        status,
        headers: response_headers,
        cache_info,
        raw,
        body,
    }));
    events.send(RequestEvent::End);
}

/// Steps 2–4: expand the base template, append the path, append the query.
fn build_url(
    base: &str,
    options: &RequestOptions,
    scope: &Scope<'_>,
    expressions: &ExpressionCache,
) -> Result<String, Error> {
    let mut url = template::expand(base, scope, expressions)?;

    if let Some(path) = options.path.as_deref() {
        if !path.is_empty() {
            if path.starts_with('/') || path.starts_with('.') {
                // Relative URL, resolved against base + '/'
                let resolved = reqwest::Url::parse(&format!("{url}/"))
                    .and_then(|resolved_base| resolved_base.join(path))
                    .map_err(|e| {
                        Error::invalid_config(format!(
                            "cannot resolve path '{path}' against '{url}': {e}"
                        ))
                    })?;
                url = resolved.to_string();
            } else {
                url.push('/');
                url.push_str(path);
            }
        }
    }

    if let Some(query) = &options.query {
        query.append_to(&mut url);
    }

    Ok(url)
}

/// `application/json` or any `+json` structured syntax
fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|value| {
        let mime = value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        mime == constants::CONTENT_TYPE_JSON || mime.ends_with(constants::CONTENT_TYPE_JSON_SUFFIX)
    })
}

fn extract_cache_info(status: StatusCode, headers: &HeaderMap) -> CacheInfo {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    CacheInfo {
        not_modified: status == StatusCode::NOT_MODIFIED,
        headers: CacheHeaders {
            last_modified: get(constants::HEADER_LAST_MODIFIED),
            etag: get(constants::HEADER_ETAG),
            expires: get(constants::HEADER_EXPIRES),
            cache_control: get(constants::HEADER_CACHE_CONTROL),
            content_type: get(constants::HEADER_CONTENT_TYPE_LC),
        },
    }
}

fn succeed(client: &ClientInner, url: &str, status: StatusCode) {
    client.lifecycle.emit(LifecycleEvent::SuccessfulRequest {
        url: url.to_string(),
        status,
    });
}

fn fail(
    client: &ClientInner,
    events: &EventSender,
    url: String,
    status: Option<StatusCode>,
    err: Error,
    num_retries_left: u32,
) {
    tracing::debug!(url = %url, error = %err, "request failed");
    client.lifecycle.emit(LifecycleEvent::FailedRequest {
        url,
        status,
        error: err.to_string(),
        num_retries_left,
    });
    events.send(RequestEvent::Error(err));
}
