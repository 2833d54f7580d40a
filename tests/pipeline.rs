//! End-to-end pipeline behaviour through `Service::call`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::header::AUTHORIZATION;
use http_body_util::BodyExt;
use serde_json::Value;

use taskd::{
    Access, AuthError, BoxFuture, CacheEntry, CacheError, CacheGateway, CacheStore, Config,
    InvalidToken, MemoryCache, MemoryTaskStore, Method, Pipeline, Request, Response, Router,
    Service, Status, TokenIssuer, TokenVerifier, UserId, api,
};

const SECRET: &str = "s3cret";

// ── helpers ───────────────────────────────────────────────────────────────────

fn token_for(user: i64) -> String {
    TokenIssuer::new(SECRET, Duration::from_secs(3600)).issue(UserId(user)).unwrap()
}

fn get(target: &str, token: &str) -> Request {
    Request::new(Method::Get, target).with_header(AUTHORIZATION, &format!("Bearer {token}"))
}

/// Plays the client: reads the whole body, then lets post-delivery cache
/// writes run.
async fn deliver(res: Response) -> (u16, Bytes) {
    let wire = res.into_inner();
    let status = wire.status().as_u16();
    let body = wire.into_body().collect().await.unwrap().to_bytes();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    (status, body)
}

/// `GET /tasks` answering `status` with a fixed body and counting calls.
fn counting_service(
    cache: Option<Arc<dyn CacheStore>>,
    ttl: Duration,
    status: Status,
) -> (Service, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let router = Router::new().route(Method::Get, "/tasks", Access::Cached, move |_req: Request| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            Response::builder()
                .status(status)
                .json(r#"[{"id":1,"title":"write tests"}]"#)
        }
    });
    let gateway = cache.map(|store| CacheGateway::new(store, ttl, Duration::from_millis(100)));
    let service = Service::new(router, Pipeline::new(TokenVerifier::new(SECRET), gateway));
    (service, calls)
}

struct Unreachable;

impl CacheStore for Unreachable {
    fn name(&self) -> &'static str {
        "unreachable"
    }
    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>, CacheError>> {
        Box::pin(async { Err(CacheError::Backend("connection refused".into())) })
    }
    fn set<'a>(&'a self, _key: &'a str, _entry: CacheEntry) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async { Err(CacheError::Backend("connection refused".into())) })
    }
    fn ping(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async { Err(CacheError::Backend("connection refused".into())) })
    }
}

// ── authentication ────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_or_malformed_authorization_never_reaches_handler() {
    let store = Arc::new(MemoryCache::new());
    let (service, calls) = counting_service(Some(store.clone()), Duration::from_secs(60), Status::Ok);

    let headers = ["", "Bearer", "Bearer ", "Basic dXNlcjpwYXNz", "Bearer not.a.jwt", "token-without-scheme"];
    for value in headers {
        let mut req = Request::new(Method::Get, "/tasks");
        if !value.is_empty() {
            req = req.with_header(AUTHORIZATION, value);
        }
        let (status, body) = deliver(service.call(req).await).await;
        assert_eq!(status, 401, "header {value:?}");
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].is_string());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(store.is_empty());
}

#[test]
fn issued_subject_round_trips_and_expires() {
    let issuer = TokenIssuer::new(SECRET, Duration::from_secs(3600));
    let verifier = TokenVerifier::new(SECRET);
    let issued_at = 1_700_000_000;
    let token = issuer.issue_at(UserId(42), issued_at).unwrap();

    let claims = verifier.verify_at(&token, issued_at + 1).unwrap();
    assert_eq!(claims.sub, UserId(42));

    assert_eq!(
        verifier.verify_at(&token, issued_at + 3600).unwrap_err(),
        AuthError::Invalid(InvalidToken::Expired),
    );
    assert_eq!(
        verifier.verify_at(&token, issued_at + 7200).unwrap_err(),
        AuthError::Invalid(InvalidToken::Expired),
    );
}

#[tokio::test]
async fn expired_token_is_rejected_by_the_pipeline() {
    let (service, calls) = counting_service(None, Duration::from_secs(60), Status::Ok);
    let stale = TokenIssuer::new(SECRET, Duration::from_secs(60))
        .issue_at(UserId(42), 1_000)
        .unwrap();

    let res = service.call(get("/tasks", &stale)).await;
    assert_eq!(res.status_code(), 401);
    assert_eq!(res.header("www-authenticate"), Some("Bearer"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ── cache-aside ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeat_read_is_served_from_cache_until_ttl_elapses() {
    let ttl = Duration::from_millis(200);
    let (service, calls) = counting_service(Some(Arc::new(MemoryCache::new())), ttl, Status::Ok);
    let token = token_for(42);

    let first = deliver(service.call(get("/tasks?x=1", &token)).await).await;
    assert_eq!(first.0, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second = deliver(service.call(get("/tasks?x=1", &token)).await).await;
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(ttl + Duration::from_millis(50)).await;

    let third = deliver(service.call(get("/tasks?x=1", &token)).await).await;
    assert_eq!(third, first);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_cache_still_serves_live_output() {
    let (service, calls) = counting_service(Some(Arc::new(Unreachable)), Duration::from_secs(60), Status::Ok);
    let token = token_for(1);

    for expected_calls in 1..=3 {
        let (status, body) = deliver(service.call(get("/tasks", &token)).await).await;
        assert_eq!(status, 200);
        assert_eq!(&body[..], br#"[{"id":1,"title":"write tests"}]"#);
        assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
    }
}

#[tokio::test]
async fn server_errors_are_never_served_from_cache() {
    let store = Arc::new(MemoryCache::new());
    let (service, calls) = counting_service(Some(store.clone()), Duration::from_secs(60), Status::InternalServerError);
    let token = token_for(1);

    for _ in 0..2 {
        let (status, _) = deliver(service.call(get("/tasks", &token)).await).await;
        assert_eq!(status, 500);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(store.is_empty());
}

#[tokio::test]
async fn abandoned_response_is_not_cached() {
    let store = Arc::new(MemoryCache::new());
    let (service, calls) = counting_service(Some(store.clone()), Duration::from_secs(60), Status::Ok);
    let token = token_for(1);

    let res = service.call(get("/tasks", &token)).await;
    drop(res.into_inner());
    tokio::task::yield_now().await;
    assert!(store.is_empty());

    deliver(service.call(get("/tasks", &token)).await).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.len(), 1);
}

// ── task API ──────────────────────────────────────────────────────────────────

fn task_service(cache: Option<Arc<dyn CacheStore>>) -> Service {
    let config = Config::from_toml(&format!(
        "jwt_secret = \"{SECRET}\"\npassword_cost = 4\n[cache]\nenabled = true\nttl_secs = 60"
    ))
    .unwrap();
    api::service(&config, Arc::new(MemoryTaskStore::new()), cache)
}

fn auth(req: Request, token: &str) -> Request {
    req.with_header(AUTHORIZATION, &format!("Bearer {token}"))
}

fn post(target: &str, body: &str) -> Request {
    Request::new(Method::Post, target).with_body(body.to_owned())
}

async fn json(res: Response) -> (u16, Value) {
    let (status, body) = deliver(res).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn register(service: &Service, username: &str) -> String {
    let body = format!(r#"{{"username":"{username}","password":"hunter2"}}"#);
    let (status, json) = json(service.call(post("/register", &body)).await).await;
    assert_eq!(status, 200);
    json["token"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn register_login_and_duplicate_username() {
    let service = task_service(None);
    register(&service, "alice").await;

    let dup = service.call(post("/register", r#"{"username":"alice","password":"x"}"#)).await;
    assert_eq!(dup.status_code(), 409);

    let ok = service.call(post("/login", r#"{"username":"alice","password":"hunter2"}"#)).await;
    let (status, body) = json(ok).await;
    assert_eq!(status, 200);
    let token = body["token"].as_str().unwrap();
    assert_eq!(TokenVerifier::new(SECRET).verify(token).unwrap().sub, UserId(1));

    let wrong = service.call(post("/login", r#"{"username":"alice","password":"nope"}"#)).await;
    assert_eq!(wrong.status_code(), 401);
    let unknown = service.call(post("/login", r#"{"username":"bob","password":"hunter2"}"#)).await;
    assert_eq!(unknown.status_code(), 401);
    let garbage = service.call(post("/login", "not json")).await;
    assert_eq!(garbage.status_code(), 400);
}

#[tokio::test]
async fn task_crud_is_scoped_to_the_caller() {
    let service = task_service(None);
    let alice = register(&service, "alice").await;
    let bob = register(&service, "bob").await;

    let created = service
        .call(auth(post("/tasks", r#"{"title":"buy milk","description":"2l"}"#), &alice))
        .await;
    assert_eq!(created.header("location"), Some("/tasks/1"));
    let (status, task) = json(created).await;
    assert_eq!(status, 201);
    assert_eq!(task["title"], "buy milk");
    assert_eq!(task["user_id"], 1);

    let (status, _) = json(service.call(get("/tasks/1", &bob)).await).await;
    assert_eq!(status, 404);
    let (status, list) = json(service.call(get("/tasks", &bob)).await).await;
    assert_eq!(status, 200);
    assert_eq!(list, Value::Array(vec![]));

    let update = Request::new(Method::Put, "/tasks/1").with_body(r#"{"title":"buy oat milk"}"#);
    let (status, body) = json(service.call(auth(update, &alice)).await).await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "task updated");

    let (_, task) = json(service.call(get("/tasks/1", &alice)).await).await;
    assert_eq!(task["title"], "buy oat milk");

    let (status, _) = json(service.call(get("/tasks/abc", &alice)).await).await;
    assert_eq!(status, 400);
    let blank = service.call(auth(post("/tasks", r#"{"title":" "}"#), &alice)).await;
    assert_eq!(blank.status_code(), 400);

    let delete = Request::new(Method::Delete, "/tasks/1");
    let (status, _) = json(service.call(auth(delete, &bob)).await).await;
    assert_eq!(status, 404);
    let delete = Request::new(Method::Delete, "/tasks/1");
    let (status, _) = json(service.call(auth(delete, &alice)).await).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn cached_task_list_lags_writes_until_ttl() {
    let service = task_service(Some(Arc::new(MemoryCache::new())));
    let alice = register(&service, "alice").await;

    let (_, before) = json(service.call(get("/tasks", &alice)).await).await;
    assert_eq!(before, Value::Array(vec![]));

    let create = auth(post("/tasks", r#"{"title":"a"}"#), &alice);
    assert_eq!(service.call(create).await.status_code(), 201);

    // Writes are not cache-coherent: the list cached above is still served.
    let (_, after) = json(service.call(get("/tasks", &alice)).await).await;
    assert_eq!(after, before);

    // A different query is a different key.
    let (_, fresh) = json(service.call(get("/tasks?refresh=1", &alice)).await).await;
    assert_eq!(fresh.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn unknown_route_and_health_probes() {
    let service = task_service(None);
    assert_eq!(service.call(Request::new(Method::Get, "/nope")).await.status_code(), 404);

    let (status, body) = deliver(service.call(Request::new(Method::Get, "/healthz")).await).await;
    assert_eq!((status, &body[..]), (200, &b"ok"[..]));

    let (status, ready) = json(service.call(Request::new(Method::Get, "/readyz")).await).await;
    assert_eq!(status, 200);
    assert_eq!(ready["cache"], "disabled");
}
