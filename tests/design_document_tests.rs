use davenport::{
    Client, ClientConfig, DesignDocument, RequestEvent, RequestOptions, ViewQuery,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn by_name_document() -> DesignDocument {
    DesignDocument::new().with_view(
        "by-name",
        "function (doc) { emit(doc.name, null); }",
        None,
    )
}

fn client_for(server: &MockServer) -> Client {
    Client::new(ClientConfig::new(server.uri()).with_design_document(by_name_document())).unwrap()
}

/// Responds 404 for the first `misses` calls, then serves the view rows.
struct ColdThenWarm {
    misses: usize,
    calls: Arc<AtomicUsize>,
    body: serde_json::Value,
}

impl ColdThenWarm {
    fn new(misses: usize, body: serde_json::Value) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                misses,
                calls: calls.clone(),
                body,
            },
            calls,
        )
    }
}

impl Respond for ColdThenWarm {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let count = self.calls.fetch_add(1, Ordering::SeqCst);
        if count < self.misses {
            ResponseTemplate::new(404).set_body_json(json!({
                "error": "not_found",
                "reason": "missing"
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(self.body.clone())
        }
    }
}

/// Matches requests that do NOT carry the given header.
struct WithoutHeader(&'static str);

impl wiremock::Match for WithoutHeader {
    fn matches(&self, request: &Request) -> bool {
        !request.headers.contains_key(self.0)
    }
}

async fn wait_for_request(server: &MockServer, http_method: &str, url_path: &str) {
    for _ in 0..100 {
        let requests = server.received_requests().await.unwrap_or_default();
        if requests
            .iter()
            .any(|r| r.method.as_str() == http_method && r.url.path() == url_path)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no {http_method} {url_path} arrived");
}

#[tokio::test]
async fn cold_cache_installs_then_retries_then_reaps() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let fp = client.fingerprint().unwrap().to_string();
    let view_path = format!("/_design/{fp}/_view/by-name");
    let stale_id = "_design/00112233445566778899aabbccddeeff";

    let (responder, view_calls) = ColdThenWarm::new(
        1,
        json!({
            "total_rows": 1,
            "offset": 0,
            "rows": [{"id": "a", "key": "ada", "value": null}]
        }),
    );
    Mock::given(method("GET"))
        .and(path(view_path.clone()))
        .respond_with(responder)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/_design/{fp}")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "ok": true, "id": format!("_design/{fp}"), "rev": "1-abc"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_all_docs"))
        .and(query_param("startkey", "\"_design/\""))
        .and(query_param("endkey", "\"_design/~\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 2,
            "offset": 0,
            "rows": [
                {"id": format!("_design/{fp}"), "key": format!("_design/{fp}"), "value": {"rev": "1-abc"}},
                {"id": stale_id, "key": stale_id, "value": {"rev": "3-old"}},
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/{stale_id}")))
        .and(query_param("rev", "3-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let envelope = client
        .query_design_document(ViewQuery::new("by-name"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(envelope.body.as_ref().unwrap()["total_rows"], json!(1));
    assert_eq!(view_calls.load(Ordering::SeqCst), 2);

    // The reaper runs detached, strictly after the caller's continuation.
    wait_for_request(&server, "DELETE", &format!("/{stale_id}")).await;

    // The installed document is the full design document.
    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .unwrap();
    let installed: serde_json::Value = serde_json::from_slice(&put.body).unwrap();
    assert_eq!(installed, serde_json::to_value(by_name_document()).unwrap());
}

#[tokio::test]
async fn warm_cache_skips_the_installer() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let fp = client.fingerprint().unwrap().to_string();

    Mock::given(method("GET"))
        .and(path(format!("/_design/{fp}/_view/by-name")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 0, "offset": 0, "rows": []
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    client
        .query_design_document(ViewQuery::new("by-name"))
        .unwrap()
        .wait()
        .await
        .unwrap();
}

#[tokio::test]
async fn install_conflict_counts_as_success() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let fp = client.fingerprint().unwrap().to_string();

    let (responder, _) = ColdThenWarm::new(
        1,
        json!({"total_rows": 0, "offset": 0, "rows": []}),
    );
    Mock::given(method("GET"))
        .and(path(format!("/_design/{fp}/_view/by-name")))
        .respond_with(responder)
        .expect(2)
        .mount(&server)
        .await;
    // A concurrent installer won the race
    Mock::given(method("PUT"))
        .and(path(format!("/_design/{fp}")))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "conflict", "reason": "Document update conflict."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_all_docs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 0, "offset": 0, "rows": []
        })))
        .mount(&server)
        .await;

    client
        .query_design_document(ViewQuery::new("by-name"))
        .unwrap()
        .wait()
        .await
        .unwrap();
}

#[tokio::test]
async fn install_failure_surfaces_without_retrying_the_view() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let fp = client.fingerprint().unwrap().to_string();

    Mock::given(method("GET"))
        .and(path(format!("/_design/{fp}/_view/by-name")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not_found"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/_design/{fp}")))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .expect(1)
        .mount(&server)
        .await;

    let err = client
        .query_design_document(ViewQuery::new("by-name"))
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
}

#[tokio::test]
async fn reinstall_happens_at_most_once_per_query() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let fp = client.fingerprint().unwrap().to_string();

    // The view stays missing even after the install: the retry's 404
    // surfaces as-is, with no second install.
    Mock::given(method("GET"))
        .and(path(format!("/_design/{fp}/_view/by-name")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not_found"})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/_design/{fp}")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_all_docs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 0, "offset": 0, "rows": []
        })))
        .mount(&server)
        .await;

    let err = client
        .query_design_document(ViewQuery::new("by-name"))
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn untrusted_view_etags_are_dropped_both_ways() {
    let server = MockServer::start().await;
    let config = ClientConfig::new(server.uri())
        .with_design_document(by_name_document())
        .trust_view_etags(false);
    let client = Client::new(config).unwrap();
    let fp = client.fingerprint().unwrap().to_string();

    Mock::given(method("GET"))
        .and(path(format!("/_design/{fp}/_view/by-name")))
        .and(WithoutHeader("if-none-match"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"view-etag\"")
                .insert_header("cache-control", "must-revalidate")
                .set_body_json(json!({"total_rows": 0, "offset": 0, "rows": []})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let query = ViewQuery::new("by-name").with_options(
        RequestOptions::new().with_header("If-None-Match", "\"stale-etag\""),
    );
    let envelope = client
        .query_design_document(query)
        .unwrap()
        .wait()
        .await
        .unwrap();

    // The ETag is stripped from the returned cache info, the other
    // validators stay.
    assert!(envelope.cache_info.headers.etag.is_none());
    assert_eq!(
        envelope.cache_info.headers.cache_control.as_deref(),
        Some("must-revalidate")
    );
}

#[tokio::test]
async fn trusted_view_etags_pass_through() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let fp = client.fingerprint().unwrap().to_string();

    Mock::given(method("GET"))
        .and(path(format!("/_design/{fp}/_view/by-name")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"view-etag\"")
                .set_body_json(json!({"total_rows": 0, "offset": 0, "rows": []})),
        )
        .mount(&server)
        .await;

    let envelope = client
        .query_design_document(ViewQuery::new("by-name"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(
        envelope.cache_info.headers.etag.as_deref(),
        Some("\"view-etag\"")
    );
}

#[tokio::test]
async fn streaming_view_query_recovers_and_streams_rows() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let fp = client.fingerprint().unwrap().to_string();

    struct ColdThenStream {
        calls: Arc<AtomicUsize>,
    }
    impl Respond for ColdThenStream {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(404).set_body_json(json!({"error": "not_found"}))
            } else {
                ResponseTemplate::new(200).set_body_raw(
                    b"{\"total_rows\":1,\"offset\":0,\"rows\":[\n{\"id\":\"a\",\"key\":\"a\",\"value\":null}\n]}\n"
                        .to_vec(),
                    "application/json",
                )
            }
        }
    }
    Mock::given(method("GET"))
        .and(path(format!("/_design/{fp}/_view/by-name")))
        .respond_with(ColdThenStream {
            calls: Arc::new(AtomicUsize::new(0)),
        })
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/_design/{fp}")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_all_docs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 0, "offset": 0, "rows": []
        })))
        .mount(&server)
        .await;

    let query =
        ViewQuery::new("by-name").with_options(RequestOptions::new().streaming());
    let mut handle = client.query_design_document(query).unwrap();

    let mut row_ids = Vec::new();
    let mut metadata = None;
    let mut ended = false;
    while let Some(event) = handle.recv().await {
        match event {
            RequestEvent::Row(row) => row_ids.push(row["id"].as_str().unwrap().to_string()),
            RequestEvent::Metadata(m) => metadata = Some(m),
            RequestEvent::End => ended = true,
            RequestEvent::Request(_) | RequestEvent::Response(_) => {}
            RequestEvent::Error(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!(row_ids, vec!["a"]);
    assert_eq!(metadata, Some(json!({"total_rows": 1, "offset": 0})));
    assert!(ended);
}

#[tokio::test]
async fn list_functions_extend_the_view_path() {
    let server = MockServer::start().await;
    let design = DesignDocument::new().with_view("by-name", "function (doc) {}", None);
    let client =
        Client::new(ClientConfig::new(server.uri()).with_design_document(design)).unwrap();
    let fp = client.fingerprint().unwrap().to_string();

    Mock::given(method("GET"))
        .and(path(format!("/_design/{fp}/_list/render/by-name")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"<html/>".to_vec(), "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let envelope = client
        .query_design_document(ViewQuery::new("by-name").with_list("render"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(&envelope.raw[..], b"<html/>");
}
