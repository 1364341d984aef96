use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    Router,
};
use resilient_http::{
    ClientConfig, HttpClient, Outcome, ReqwestProbe, ReqwestTransport, Request, Transport,
};

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    body: String,
    delay: Duration,
    location: Option<&'static str>,
}

impl MockResponse {
    fn text(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            body: body.to_owned(),
            delay: Duration::from_millis(0),
            location: None,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn redirect_to(location: &'static str) -> Self {
        Self {
            location: Some(location),
            ..Self::text(StatusCode::FOUND, "")
        }
    }
}

#[derive(Clone, Debug)]
struct Seen {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: String,
    at: Instant,
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    seen: Arc<Mutex<Vec<Seen>>>,
    hits: Arc<AtomicUsize>,
}

async fn any_handler(
    State(state): State<MockState>,
    method: Method,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state
        .seen
        .lock()
        .expect("seen log mutex must not be poisoned")
        .push(Seen {
            method,
            path: uri.path().to_owned(),
            query: uri.query().map(str::to_owned),
            headers,
            body,
            at: Instant::now(),
        });

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "no mock response available")
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut headers = HeaderMap::new();
    if let Some(location) = response.location {
        headers.insert(
            header::LOCATION,
            location.parse().expect("mock location must be a header value"),
        );
    }
    (response.status, headers, response.body)
}

struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Seen>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen
            .lock()
            .expect("seen log mutex must not be poisoned")
            .clone()
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        seen: Arc::new(Mutex::new(Vec::new())),
        hits: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .fallback(any_handler)
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        hits: state.hits,
        seen: state.seen,
        task,
    }
}

fn config(max_retries: u32) -> ClientConfig {
    ClientConfig::builder()
        .max_retries(max_retries)
        .total_timeout(Duration::from_secs(2))
        .build()
        .expect("test config must build")
}

#[tokio::test]
async fn get_returns_body_on_first_success() {
    let server = spawn_server(vec![MockResponse::text(StatusCode::OK, "hello")]).await;
    let client = HttpClient::new(config(3));

    let result = client.get(&server.url("/page")).await;

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.status_code, 200);
    assert_eq!(result.text(), "hello");
    assert_eq!(result.attempts_used, 1);
    assert!(result.error_message.is_empty());
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn retries_on_server_error_until_success() {
    let server = spawn_server(vec![
        MockResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        MockResponse::text(StatusCode::BAD_GATEWAY, "boom"),
        MockResponse::text(StatusCode::OK, "recovered"),
    ])
    .await;
    let client = HttpClient::new(config(3));

    let result = client.get(&server.url("/flaky")).await;

    assert!(result.is_success());
    assert_eq!(result.attempts_used, 3);
    assert_eq!(result.text(), "recovered");
    assert_eq!(server.hits(), 3);
}

#[tokio::test]
async fn exhaustion_returns_last_status_and_body() {
    let server = spawn_server(vec![
        MockResponse::text(StatusCode::SERVICE_UNAVAILABLE, "first"),
        MockResponse::text(StatusCode::TOO_MANY_REQUESTS, "second"),
    ])
    .await;
    let client = HttpClient::new(config(2));

    let result = client.get(&server.url("/down")).await;

    assert_eq!(result.outcome, Outcome::Exhausted);
    assert_eq!(result.status_code, 429);
    assert_eq!(result.text(), "second");
    assert_eq!(result.attempts_used, 2);
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn client_error_status_is_retried_too() {
    let server = spawn_server(vec![
        MockResponse::text(StatusCode::NOT_FOUND, "missing"),
        MockResponse::text(StatusCode::OK, "found"),
    ])
    .await;
    let client = HttpClient::new(config(2));

    let result = client.get(&server.url("/eventually")).await;

    assert!(result.is_success());
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn timeout_is_reported_as_status_zero_with_error_text() {
    let server = spawn_server(vec![
        MockResponse::text(StatusCode::OK, "late").with_delay(Duration::from_millis(300)),
        MockResponse::text(StatusCode::OK, "late").with_delay(Duration::from_millis(300)),
    ])
    .await;
    let config = ClientConfig::builder()
        .max_retries(2)
        .total_timeout(Duration::from_millis(50))
        .build()
        .expect("test config must build");
    let client = HttpClient::new(config);

    let result = client.get(&server.url("/slow")).await;

    assert_eq!(result.outcome, Outcome::Exhausted);
    assert_eq!(result.status_code, 0);
    assert!(!result.error_message.is_empty());
    assert_eq!(result.attempts_used, 2);
}

#[tokio::test]
async fn connection_refused_is_retried_then_reported() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("must bind probe port");
    let address = listener.local_addr().expect("must have local addr");
    drop(listener);
    let client = HttpClient::new(config(2));

    let result = client.get(&format!("http://{address}/")).await;

    assert_eq!(result.outcome, Outcome::Exhausted);
    assert_eq!(result.status_code, 0);
    assert_eq!(result.attempts_used, 2);
    assert!(!result.error_message.is_empty());
}

#[tokio::test]
async fn post_sends_body_content_type_and_headers() {
    let server = spawn_server(vec![MockResponse::text(StatusCode::CREATED, "ok")]).await;
    let config = ClientConfig::builder()
        .default_header("X-Client", "resilient")
        .build()
        .expect("test config must build");
    let client = HttpClient::new(config);
    let user_agent = client
        .user_agent()
        .expect("random user agent enabled by default")
        .to_owned();

    let result = client
        .post_form(&server.url("/submit"), [("name", "Kit"), ("lang", "rust")])
        .await;

    assert_eq!(result.status_code, 201);
    let seen = server.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::POST);
    assert_eq!(seen[0].body, "name=Kit&lang=rust");
    assert_eq!(
        seen[0].headers[header::CONTENT_TYPE],
        "application/x-www-form-urlencoded"
    );
    assert_eq!(seen[0].headers["x-client"], "resilient");
    assert_eq!(seen[0].headers[header::USER_AGENT], user_agent.as_str());
}

#[tokio::test]
async fn request_header_overrides_default_header() {
    let server = spawn_server(vec![MockResponse::text(StatusCode::OK, "")]).await;
    let config = ClientConfig::builder()
        .default_header("Accept", "text/html")
        .random_user_agent(false)
        .build()
        .expect("test config must build");
    let client = HttpClient::new(config);

    client
        .execute(&Request::get(server.url("/")).with_header("accept", "application/json"))
        .await;

    let seen = server.seen();
    assert_eq!(seen[0].headers[header::ACCEPT], "application/json");
    assert_eq!(seen[0].headers.get_all(header::ACCEPT).iter().count(), 1);
}

#[tokio::test]
async fn query_parameters_and_base_url_are_applied() {
    let server = spawn_server(vec![MockResponse::text(StatusCode::OK, "")]).await;
    let config = ClientConfig::builder()
        .base_url(server.url("/api"))
        .build()
        .expect("test config must build");
    let client = HttpClient::new(config);

    let result = client
        .get_with_query("users", [("page", "2"), ("q", "a b")])
        .await;

    assert!(result.is_success());
    let seen = server.seen();
    assert_eq!(seen[0].path, "/api/users");
    assert_eq!(seen[0].query.as_deref(), Some("page=2&q=a+b"));
}

#[tokio::test]
async fn redirects_are_followed_by_default() {
    let server = spawn_server(vec![
        MockResponse::redirect_to("/target"),
        MockResponse::text(StatusCode::OK, "landed"),
    ])
    .await;
    let client = HttpClient::new(config(1));

    let result = client.get(&server.url("/start")).await;

    assert!(result.is_success());
    assert_eq!(result.text(), "landed");
    assert_eq!(server.seen()[1].path, "/target");
}

#[tokio::test]
async fn disabled_redirects_surface_as_failure() {
    let server = spawn_server(vec![MockResponse::redirect_to("/target")]).await;
    let config = ClientConfig::builder()
        .max_retries(1)
        .follow_redirects(false)
        .build()
        .expect("test config must build");
    let client = HttpClient::new(config);

    let result = client.get(&server.url("/start")).await;

    assert_eq!(result.outcome, Outcome::Exhausted);
    assert_eq!(result.status_code, 302);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn pacing_spaces_real_dispatches() {
    let delay = Duration::from_millis(120);
    let server = spawn_server(Vec::new()).await;
    let config = ClientConfig::builder()
        .max_retries(3)
        .request_delay(delay)
        .build()
        .expect("test config must build");
    let client = HttpClient::new(config);

    let result = client.get(&server.url("/paced")).await;

    assert_eq!(result.attempts_used, 3);
    let seen = server.seen();
    assert_eq!(seen.len(), 3);
    for pair in seen.windows(2) {
        // Arrival times trail dispatch by a little network jitter.
        assert!(pair[1].at.duration_since(pair[0].at) >= delay - Duration::from_millis(20));
    }
}

#[tokio::test]
async fn redirect_chain_longer_than_limit_is_a_transport_failure() {
    let server = spawn_server(vec![
        MockResponse::redirect_to("/hop-1"),
        MockResponse::redirect_to("/hop-2"),
        MockResponse::redirect_to("/hop-3"),
        MockResponse::text(StatusCode::OK, "never reached"),
    ])
    .await;
    let config = ClientConfig::builder()
        .max_retries(1)
        .max_redirects(1)
        .build()
        .expect("test config must build");
    let client = HttpClient::new(config);

    let result = client.get(&server.url("/start")).await;

    assert_eq!(result.outcome, Outcome::Exhausted);
    assert_eq!(result.status_code, 0);
    assert!(!result.error_message.is_empty());
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn shared_transport_honors_each_config() {
    let server = spawn_server(vec![
        MockResponse::redirect_to("/target"),
        MockResponse::text(StatusCode::OK, "landed"),
        MockResponse::redirect_to("/target"),
    ])
    .await;
    let transport = Arc::new(ReqwestTransport::new());
    let following = ClientConfig::builder()
        .max_retries(1)
        .build()
        .expect("test config must build");
    let not_following = ClientConfig::builder()
        .max_retries(1)
        .follow_redirects(false)
        .build()
        .expect("test config must build");

    let followed = transport
        .send(&Request::get(server.url("/start")), None, &following)
        .await
        .expect("followed send must complete");
    assert_eq!(followed.status, 200);

    let probe = Arc::new(ReqwestProbe::new(
        not_following.probe_target().clone(),
        not_following.probe_timeout(),
    ));
    let client = HttpClient::with_transport(not_following, transport.clone(), probe);
    let result = client.get(&server.url("/start")).await;

    assert_eq!(result.outcome, Outcome::Exhausted);
    assert_eq!(result.status_code, 302);
    assert_eq!(server.hits(), 3);
}
