use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use regex::Regex;
use serde_json::json;

use courier_rs::{
    Credentials, Disposition, ExchangeError, ExchangeRequest, HttpExchange, MemoryForm, Params,
    RawResponse, RequestId, RequestOptions, Transport, TransportError, TransportEvent,
    TransportEventHandler,
};

#[derive(Clone)]
enum Script {
    Respond { status: u16, body: &'static str },
    Hang,
    Fail(&'static str),
}

/// Exchange scripted by URL path, recording every request it sees.
struct StubExchange {
    routes: Mutex<HashMap<String, Script>>,
    seen: Mutex<Vec<ExchangeRequest>>,
}

impl StubExchange {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn route(&self, path: &str, script: Script) {
        self.routes.lock().unwrap().insert(path.to_string(), script);
    }

    fn seen(&self) -> Vec<ExchangeRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpExchange for StubExchange {
    async fn send(&self, request: ExchangeRequest) -> Result<RawResponse, ExchangeError> {
        let path = request.url.split('?').next().unwrap_or("").to_string();
        self.seen.lock().unwrap().push(request);
        let script = self
            .routes
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or(Script::Respond {
                status: 200,
                body: "",
            });
        match script {
            Script::Respond { status, body } => Ok(RawResponse {
                status,
                status_text: "scripted".to_string(),
                headers: http::HeaderMap::new(),
                body: bytes::Bytes::from_static(body.as_bytes()),
            }),
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Script::Fail(message) => Err(ExchangeError::Transport(message.to_string())),
        }
    }
}

/// Handler that records the order of everything it observes.
struct Recorder {
    log: Mutex<Vec<String>>,
    veto: bool,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            veto: false,
        })
    }

    fn vetoing() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            veto: true,
        })
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl TransportEventHandler for Recorder {
    fn before_request(&self, id: RequestId, _options: &RequestOptions) -> bool {
        self.log.lock().unwrap().push(format!("before:{id}"));
        !self.veto
    }

    fn handle(&self, event: &TransportEvent) {
        let entry = match event {
            TransportEvent::RequestComplete(complete) => {
                format!("complete:{}:{}", complete.id, complete.status)
            }
            TransportEvent::RequestException(exception) => format!(
                "exception:{}:aborted={}:timed_out={}",
                exception.id, exception.aborted, exception.timed_out
            ),
            TransportEvent::HeaderRejected(rejected) => {
                format!("rejected:{}:{}", rejected.id, rejected.name)
            }
        };
        self.log.lock().unwrap().push(entry);
    }
}

fn transport_over(stub: Arc<StubExchange>) -> Transport {
    Transport::builder().with_exchange(stub).build().unwrap()
}

#[tokio::test]
async fn params_travel_as_post_body_with_inferred_headers() {
    let stub = StubExchange::new();
    let transport = transport_over(stub.clone());

    let completion = transport
        .execute(
            RequestOptions::new()
                .with_url("/submit")
                .with_params(Params::new().set("a", 1).set("b", "two")),
        )
        .await
        .unwrap();

    assert!(completion.is_success());
    let seen = stub.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::POST);
    assert_eq!(seen[0].url, "/submit");
    assert_eq!(
        seen[0].body.as_deref(),
        Some("a=1&b=two".as_bytes())
    );
    assert_eq!(
        seen[0].headers.get("content-type").unwrap(),
        "application/x-www-form-urlencoded; charset=UTF-8"
    );
    assert_eq!(
        seen[0].headers.get("x-requested-with").unwrap(),
        "XMLHttpRequest"
    );
    assert_eq!(transport.active_count(), 0);
}

#[tokio::test]
async fn get_appends_cache_buster_before_folded_params() {
    let stub = StubExchange::new();
    let transport = transport_over(stub.clone());

    transport
        .execute(
            RequestOptions::new()
                .with_url("/x")
                .with_method(Method::GET)
                .with_params(Params::new().set("a", 1)),
        )
        .await
        .unwrap();

    let url = stub.seen()[0].url.clone();
    let shape = Regex::new(r"^/x\?_dc=\d+&a=1$").unwrap();
    assert!(shape.is_match(&url), "unexpected url {url}");
    assert!(stub.seen()[0].body.is_none());
}

#[tokio::test]
async fn json_payload_folds_params_into_the_url() {
    let stub = StubExchange::new();
    let transport = transport_over(stub.clone());

    transport
        .execute(
            RequestOptions::new()
                .with_url("/s")
                .with_method(Method::POST)
                .with_json(json!({"k": true}))
                .with_params(Params::new().set("x", 2)),
        )
        .await
        .unwrap();

    let seen = stub.seen();
    assert_eq!(seen[0].url, "/s?x=2");
    assert_eq!(seen[0].body.as_deref(), Some(br#"{"k":true}"#.as_slice()));
    assert_eq!(seen[0].headers.get("content-type").unwrap(), "application/json");
}

#[tokio::test]
async fn method_defaults_follow_the_payload() {
    let stub = StubExchange::new();
    let transport = transport_over(stub.clone());

    transport
        .execute(
            RequestOptions::new()
                .with_url("/bare")
                .with_disable_caching(false),
        )
        .await
        .unwrap();
    transport
        .execute(
            RequestOptions::new()
                .with_url("/loaded")
                .with_params(Params::new().set("p", 1)),
        )
        .await
        .unwrap();

    let seen = stub.seen();
    assert_eq!(seen[0].method, Method::GET);
    assert_eq!(seen[0].url, "/bare");
    assert_eq!(seen[1].method, Method::POST);
}

#[tokio::test]
async fn per_request_timeout_produces_a_timed_out_exception() {
    let stub = StubExchange::new();
    stub.route("/slow", Script::Hang);
    let transport = transport_over(stub.clone());

    let completion = transport
        .execute(
            RequestOptions::new()
                .with_url("/slow")
                .with_params(Params::new().set("x", 1))
                .with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert_eq!(completion.disposition, Disposition::Exception);
    assert!(completion.timed_out);
    assert!(!completion.aborted);
    let response = completion.response().unwrap();
    assert_eq!(response.status(), 0);
    assert_eq!(response.status_text(), "request timed out");
    assert_eq!(transport.active_count(), 0);
}

#[tokio::test]
async fn transport_timeout_applies_when_request_has_none() {
    let stub = StubExchange::new();
    stub.route("/slow", Script::Hang);
    let transport = Transport::builder()
        .with_exchange(stub)
        .with_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let completion = transport
        .execute(
            RequestOptions::new()
                .with_url("/slow")
                .with_params(Params::new().set("x", 1)),
        )
        .await
        .unwrap();

    assert!(completion.timed_out);
}

#[tokio::test]
async fn abort_cancels_an_in_flight_request() {
    let stub = StubExchange::new();
    stub.route("/slow", Script::Hang);
    let transport = transport_over(stub);

    let handle = transport
        .request(
            RequestOptions::new()
                .with_url("/slow")
                .with_params(Params::new().set("x", 1)),
        )
        .unwrap();
    let id = handle.id();
    assert!(transport.is_active(id));

    assert!(transport.abort(id));
    assert!(!transport.abort(id));

    let completion = handle.outcome().await;
    assert_eq!(completion.disposition, Disposition::Exception);
    assert!(completion.aborted);
    assert!(!completion.timed_out);
    assert_eq!(
        completion.response().unwrap().status_text(),
        "transaction aborted"
    );
    assert_eq!(transport.active_count(), 0);
}

#[tokio::test]
async fn abort_all_drains_every_in_flight_request() {
    let stub = StubExchange::new();
    stub.route("/a", Script::Hang);
    stub.route("/b", Script::Hang);
    let transport = transport_over(stub);

    let first = transport
        .request(RequestOptions::new().with_url("/a").with_method(Method::POST))
        .unwrap();
    let second = transport
        .request(RequestOptions::new().with_url("/b").with_method(Method::POST))
        .unwrap();
    assert_eq!(transport.active_count(), 2);

    assert_eq!(transport.abort_all(), 2);
    assert_eq!(transport.abort_all(), 0);

    assert!(first.outcome().await.aborted);
    assert!(second.outcome().await.aborted);
}

#[tokio::test]
async fn auto_abort_displaces_earlier_requests() {
    let stub = StubExchange::new();
    stub.route("/slow", Script::Hang);
    let transport = transport_over(stub);

    let stuck = transport
        .request(RequestOptions::new().with_url("/slow").with_method(Method::POST))
        .unwrap();
    let fresh = transport
        .execute(
            RequestOptions::new()
                .with_url("/fresh")
                .with_method(Method::POST)
                .with_auto_abort(true),
        )
        .await
        .unwrap();

    assert!(fresh.is_success());
    assert!(stuck.outcome().await.aborted);
}

#[tokio::test]
async fn vetoed_requests_are_suppressed_without_side_effects() {
    let stub = StubExchange::new();
    let recorder = Recorder::vetoing();
    let transport = Transport::builder()
        .with_exchange(stub.clone())
        .with_handler(recorder.clone())
        .build()
        .unwrap();

    let first = transport
        .request(RequestOptions::new().with_url("/never"))
        .unwrap();
    let second = transport
        .request(RequestOptions::new().with_url("/never"))
        .unwrap();

    // Suppressed requests still consume ids.
    assert_eq!(first.id(), 1);
    assert_eq!(second.id(), 2);

    let completion = first.outcome().await;
    assert_eq!(completion.disposition, Disposition::Suppressed);
    assert!(completion.response().is_none());

    assert!(stub.seen().is_empty());
    assert_eq!(transport.active_count(), 0);
    assert_eq!(recorder.entries(), vec!["before:1", "before:2"]);
}

#[tokio::test]
async fn completion_events_precede_handle_resolution() {
    let stub = StubExchange::new();
    stub.route("/ok", Script::Respond { status: 200, body: "done" });
    let recorder = Recorder::new();
    let transport = Transport::builder()
        .with_exchange(stub)
        .with_handler(recorder.clone())
        .build()
        .unwrap();

    let completion = transport
        .execute(RequestOptions::new().with_url("/ok").with_method(Method::POST))
        .await
        .unwrap();

    assert!(completion.is_success());
    // By the time the handle resolved, the event must already be visible.
    assert_eq!(recorder.entries(), vec!["before:1", "complete:1:200"]);
}

#[tokio::test]
async fn unrepresentable_headers_are_dropped_and_reported() {
    let stub = StubExchange::new();
    let recorder = Recorder::new();
    let transport = Transport::builder()
        .with_exchange(stub.clone())
        .with_handler(recorder.clone())
        .build()
        .unwrap();

    let completion = transport
        .execute(
            RequestOptions::new()
                .with_url("/ok")
                .with_method(Method::POST)
                .with_header("bad header", "x")
                .with_header("X-Bad-Value", "line\nbreak")
                .with_header("X-Fine", "kept"),
        )
        .await
        .unwrap();

    assert!(completion.is_success());
    let seen = stub.seen();
    assert_eq!(seen[0].headers.get("x-fine").unwrap(), "kept");
    assert!(!seen[0].headers.contains_key("x-bad-value"));

    let entries = recorder.entries();
    assert!(entries.contains(&"rejected:1:bad header".to_string()));
    assert!(entries.contains(&"rejected:1:X-Bad-Value".to_string()));
    assert!(entries.contains(&"complete:1:200".to_string()));
}

#[tokio::test]
async fn legacy_1223_status_normalizes_to_success() {
    let stub = StubExchange::new();
    stub.route("/legacy", Script::Respond { status: 1223, body: "" });
    let transport = transport_over(stub);

    let completion = transport
        .execute(RequestOptions::new().with_url("/legacy").with_method(Method::POST))
        .await
        .unwrap();

    assert!(completion.is_success());
    assert_eq!(completion.status(), Some(204));
}

#[tokio::test]
async fn transport_error_statuses_classify_as_exceptions() {
    let stub = StubExchange::new();
    stub.route("/flaky", Script::Respond { status: 12029, body: "" });
    let transport = transport_over(stub);

    let completion = transport
        .execute(RequestOptions::new().with_url("/flaky").with_method(Method::POST))
        .await
        .unwrap();

    assert_eq!(completion.disposition, Disposition::Exception);
    assert!(!completion.aborted);
    assert!(!completion.timed_out);
    assert_eq!(completion.status(), Some(12029));
}

#[tokio::test]
async fn server_errors_are_failures_with_the_response_attached() {
    let stub = StubExchange::new();
    stub.route("/broken", Script::Respond { status: 500, body: "oops" });
    let transport = transport_over(stub);

    let completion = transport
        .execute(RequestOptions::new().with_url("/broken").with_method(Method::POST))
        .await
        .unwrap();

    assert_eq!(completion.disposition, Disposition::Failure);
    let response = completion.response().unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text(), "oops");
}

#[tokio::test]
async fn wire_failures_become_communication_exceptions() {
    let stub = StubExchange::new();
    stub.route("/gone", Script::Fail("connection refused"));
    let transport = transport_over(stub);

    let completion = transport
        .execute(RequestOptions::new().with_url("/gone").with_method(Method::POST))
        .await
        .unwrap();

    assert_eq!(completion.disposition, Disposition::Exception);
    let response = completion.response().unwrap();
    assert_eq!(response.status(), 0);
    assert_eq!(response.status_text(), "communication failure");
    assert!(response.text().contains("connection refused"));
}

#[tokio::test]
async fn missing_url_fails_fast_as_a_configuration_error() {
    let transport = transport_over(StubExchange::new());
    let err = transport.request(RequestOptions::new()).unwrap_err();
    assert!(matches!(err, TransportError::Configuration(_)));
}

#[tokio::test]
async fn transport_defaults_supply_url_and_extra_params() {
    let stub = StubExchange::new();
    let transport = Transport::builder()
        .with_exchange(stub.clone())
        .with_url("/base")
        .with_extra_params(Params::new().set("k", "v"))
        .build()
        .unwrap();

    transport
        .execute(RequestOptions::new().with_params(Params::new().set("a", 1)))
        .await
        .unwrap();

    let seen = stub.seen();
    assert_eq!(seen[0].url, "/base");
    assert_eq!(seen[0].body.as_deref(), Some("a=1&k=v".as_bytes()));
}

#[tokio::test]
async fn plain_form_fields_serialize_onto_the_standard_path() {
    let stub = StubExchange::new();
    let transport = transport_over(stub.clone());

    let form = MemoryForm::urlencoded("/form-action");
    form.add_field("f", "1");
    let completion = transport
        .execute(RequestOptions::new().with_form(Arc::new(form)))
        .await
        .unwrap();

    assert!(completion.is_success());
    let seen = stub.seen();
    assert_eq!(seen[0].url, "/form-action");
    assert_eq!(seen[0].method, Method::POST);
    assert_eq!(seen[0].body.as_deref(), Some("f=1".as_bytes()));
}

#[tokio::test]
async fn credentials_are_forwarded_to_the_exchange() {
    let stub = StubExchange::new();
    let transport = transport_over(stub.clone());

    transport
        .execute(
            RequestOptions::new()
                .with_url("/auth")
                .with_method(Method::POST)
                .with_credentials(Credentials::basic("user", "secret")),
        )
        .await
        .unwrap();

    assert_eq!(
        stub.seen()[0].credentials,
        Some(Credentials::basic("user", "secret"))
    );
}

#[tokio::test]
async fn deferred_url_and_params_resolve_at_issue_time() {
    let stub = StubExchange::new();
    let transport = transport_over(stub.clone());

    transport
        .execute(
            RequestOptions::new()
                .with_url_resolver(|| "/dynamic".to_string())
                .with_params_resolver(|| Params::new().set("n", 7)),
        )
        .await
        .unwrap();

    let seen = stub.seen();
    assert_eq!(seen[0].url, "/dynamic");
    assert_eq!(seen[0].body.as_deref(), Some("n=7".as_bytes()));
}

#[tokio::test]
async fn in_flight_snapshots_expose_method_and_url() {
    let stub = StubExchange::new();
    stub.route("/slow", Script::Hang);
    let transport = transport_over(stub);

    let handle = transport
        .request(RequestOptions::new().with_url("/slow").with_method(Method::POST))
        .unwrap();

    let active = transport.active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, handle.id());
    assert_eq!(active[0].method, Method::POST);
    assert_eq!(active[0].url, "/slow");

    transport.abort(handle.id());
    handle.outcome().await;
    assert!(transport.active().is_empty());
}

#[tokio::test]
async fn metrics_aggregate_success_failure_and_exception() {
    let stub = StubExchange::new();
    stub.route("/ok", Script::Respond { status: 200, body: "" });
    stub.route("/bad", Script::Respond { status: 500, body: "" });
    stub.route("/err", Script::Fail("reset"));
    let transport = transport_over(stub);

    for url in ["/ok", "/bad", "/err"] {
        transport
            .execute(RequestOptions::new().with_url(url).with_method(Method::POST))
            .await
            .unwrap();
    }

    let snapshot = transport.metrics().unwrap();
    assert_eq!(snapshot.global.total_requests, 3);
    assert_eq!(snapshot.global.successes, 1);
    assert_eq!(snapshot.global.failures, 1);
    assert_eq!(snapshot.global.exceptions, 1);
}

#[tokio::test]
async fn disabling_metrics_removes_the_snapshot() {
    let transport = Transport::builder()
        .with_exchange(StubExchange::new())
        .disable_metrics()
        .build()
        .unwrap();
    assert!(transport.metrics().is_none());
}

#[tokio::test]
async fn dropping_the_transport_aborts_outstanding_requests() {
    let stub = StubExchange::new();
    stub.route("/slow", Script::Hang);
    let transport = transport_over(stub);

    let handle = transport
        .request(RequestOptions::new().with_url("/slow").with_method(Method::POST))
        .unwrap();
    drop(transport);

    let completion = handle.outcome().await;
    assert_eq!(completion.disposition, Disposition::Exception);
    assert!(completion.aborted);
}

#[test]
fn requests_launch_from_blocking_threads_once_the_runtime_is_entered() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();

    let stub = StubExchange::new();
    stub.route("/blocking", Script::Respond { status: 200, body: "ok" });
    let transport = transport_over(stub);

    let handle = transport
        .request(RequestOptions::new().with_url("/blocking"))
        .unwrap();
    let completion = runtime.block_on(handle.outcome());

    assert_eq!(completion.disposition, Disposition::Success);
    assert_eq!(completion.status(), Some(200));
}
