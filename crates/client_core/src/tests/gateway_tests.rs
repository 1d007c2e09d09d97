use super::*;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use shared::error::ErrorKind;
use tokio::{net::TcpListener, sync::Mutex};

use crate::{
    session::MemorySessionStore,
    store::{ApplicationState, Store},
};

#[derive(Debug, Clone)]
struct Recorded {
    route: String,
    authorization: Option<String>,
}

#[derive(Clone, Default)]
struct Backend {
    requests: Arc<Mutex<Vec<Recorded>>>,
    params: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
    refreshes: Arc<AtomicUsize>,
    fail_queries: Arc<AtomicBool>,
    fail_reviews: Arc<AtomicBool>,
    fail_refresh: Arc<AtomicBool>,
}

impl Backend {
    async fn record(&self, route: &str, headers: &HeaderMap) {
        let authorization = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.requests.lock().await.push(Recorded {
            route: route.to_string(),
            authorization,
        });
    }

    async fn hit_count(&self, route: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|request| request.route == route)
            .count()
    }

    async fn authorization_for(&self, route: &str) -> Option<String> {
        self.requests
            .lock()
            .await
            .iter()
            .rev()
            .find(|request| request.route == route)
            .and_then(|request| request.authorization.clone())
    }

    async fn last_params(&self) -> BTreeMap<String, String> {
        self.params.lock().await.last().cloned().expect("params")
    }

    async fn last_body(&self) -> Value {
        self.bodies.lock().await.last().cloned().expect("body")
    }

    fn review_status(&self) -> StatusCode {
        if self.fail_reviews.load(Ordering::SeqCst) {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        }
    }
}

async fn handle_auth_anon(State(backend): State<Backend>, headers: HeaderMap) -> Json<Value> {
    backend.record("POST /auth/anon", &headers).await;
    Json(json!({
        "access_token": "anon-access",
        "refresh_token": "anon-refresh",
        "user_id": "u-anon",
    }))
}

async fn handle_auth_refresh(State(backend): State<Backend>, headers: HeaderMap) -> Response {
    backend.record("POST /auth/refresh", &headers).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    if backend.fail_refresh.load(Ordering::SeqCst) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let n = backend.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "access_token": format!("refreshed-access-{n}") })).into_response()
}

async fn handle_cuisines(State(backend): State<Backend>, headers: HeaderMap) -> Response {
    backend.record("GET /cuisines", &headers).await;
    if backend.fail_queries.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!(["Bakery", "Hamburgers"])).into_response()
}

async fn handle_restaurants(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    backend.record("GET /restaurants", &headers).await;
    backend.params.lock().await.push(params.clone());

    if params.contains_key("slow") {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    if let Some(id) = params.get("id") {
        return Json(json!({
            "id": id,
            "name": "Morris Park Bake Shop",
            "cuisine": "Bakery",
            "borough": "Bronx",
            "reviews": [],
        }))
        .into_response();
    }
    Json(json!({
        "page": 0,
        "total": 1,
        "items": [{ "id": "x", "name": "Morris Park Bake Shop" }],
    }))
    .into_response()
}

async fn handle_create_review(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    backend.record("POST /reviews", &headers).await;
    backend.bodies.lock().await.push(body);
    backend.review_status()
}

async fn handle_update_review(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
    Json(body): Json<Value>,
) -> StatusCode {
    backend.record("PUT /reviews", &headers).await;
    backend.params.lock().await.push(params);
    let rejected = body["text"] == json!("rejected");
    backend.bodies.lock().await.push(body);
    if rejected {
        // answers after later requests do
        tokio::time::sleep(Duration::from_millis(150)).await;
        return StatusCode::UNPROCESSABLE_ENTITY;
    }
    backend.review_status()
}

async fn handle_delete_review(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> StatusCode {
    backend.record("DELETE /reviews", &headers).await;
    backend.params.lock().await.push(params);
    backend.review_status()
}

async fn spawn_backend() -> (String, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/auth/anon", post(handle_auth_anon))
        .route("/auth/refresh", post(handle_auth_refresh))
        .route("/cuisines", get(handle_cuisines))
        .route("/restaurants", get(handle_restaurants))
        .route(
            "/reviews",
            post(handle_create_review)
                .put(handle_update_review)
                .delete(handle_delete_review),
        )
        .with_state(backend.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), backend)
}

struct Fixture {
    api: Arc<RestaurantApi>,
    store: Arc<Store>,
    session: Arc<MemorySessionStore>,
    backend: Backend,
}

async fn fixture() -> Fixture {
    fixture_with(ApplicationState::default(), |_| {}).await
}

async fn fixture_with(
    state: ApplicationState,
    configure: impl FnOnce(&mut ClientSettings),
) -> Fixture {
    let (base_url, backend) = spawn_backend().await;
    let mut settings = ClientSettings::for_base_url(base_url);
    configure(&mut settings);

    let store = Arc::new(Store::with_state(state));
    let session = Arc::new(MemorySessionStore::new());
    let api = RestaurantApi::new(settings, store.clone(), session.clone());
    Fixture {
        api,
        store,
        session,
        backend,
    }
}

fn params(pairs: &[(&str, &str)]) -> QueryParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn review(id: &str, restaurant_id: &str, text: &str) -> Review {
    Review {
        id: ReviewId::from(id),
        restaurant_id: RestaurantId::from(restaurant_id),
        user_id: UserId::from("u-1"),
        text: text.to_string(),
        rating: 4,
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    }
}

fn state_with_restaurant(id: &str, reviews: Vec<Review>) -> ApplicationState {
    let mut restaurant = Restaurant::new(id, "Morris Park Bake Shop");
    restaurant.reviews = reviews;
    let mut state = ApplicationState::default();
    state
        .restaurants_by_id
        .insert(RestaurantId::from(id), restaurant);
    state
}

fn review_ids(state: &ApplicationState, restaurant_id: &str) -> Vec<String> {
    state
        .restaurant(&RestaurantId::from(restaurant_id))
        .expect("restaurant")
        .reviews
        .iter()
        .map(|review| review.id.to_string())
        .collect()
}

fn review_text(state: &ApplicationState, restaurant_id: &str, id: &str) -> String {
    state
        .restaurant(&RestaurantId::from(restaurant_id))
        .and_then(|restaurant| restaurant.review(&ReviewId::from(id)))
        .map(|review| review.text.clone())
        .expect("review")
}

async fn wait_until(store: &Store, predicate: impl FnMut(&Arc<ApplicationState>) -> bool) {
    let mut rx = store.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("store alive");
}

fn stored_tokens() -> Tokens {
    serde_json::from_value(json!({
        "access_token": "stored-access",
        "refresh_token": "stored-refresh",
    }))
    .expect("tokens")
}

#[tokio::test]
async fn auth_requests_anonymous_tokens_and_persists_them() {
    let fx = fixture().await;
    assert!(!fx.api.is_authenticated());

    fx.api.auth().await.expect("auth");

    assert!(fx.api.is_authenticated());
    assert!(fx.api.sdk_user().is_none());
    assert_eq!(fx.backend.hit_count("POST /auth/anon").await, 1);
    let tokens = fx.api.tokens().await.expect("persisted tokens");
    assert_eq!(tokens.access_token, "anon-access");
    assert_eq!(tokens.extra.get("user_id"), Some(&json!("u-anon")));
}

#[tokio::test]
async fn auth_reuses_stored_tokens() {
    let fx = fixture().await;
    save_tokens(fx.session.as_ref(), &stored_tokens())
        .await
        .expect("seed session");

    fx.api.auth().await.expect("auth");
    fx.api
        .get_cuisines()
        .await
        .expect("cuisines")
        .expect("not cancelled");

    assert_eq!(fx.backend.hit_count("POST /auth/anon").await, 0);
    assert_eq!(
        fx.backend.authorization_for("GET /cuisines").await.as_deref(),
        Some("Bearer stored-access")
    );
}

#[tokio::test]
async fn queries_issued_before_auth_wait_for_it() {
    let fx = fixture().await;

    let pending = fx.api.get_cuisines();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());
    assert_eq!(fx.backend.hit_count("GET /cuisines").await, 0);

    fx.api.auth().await.expect("auth");
    let cuisines = pending.await.expect("cuisines").expect("not cancelled");

    assert_eq!(cuisines, vec!["Bakery", "Hamburgers"]);
    let state = fx.store.state();
    assert_eq!(state.cuisines, cuisines);
    assert_eq!(state.in_flight, 0);
    assert_eq!(fx.backend.hit_count("GET /cuisines").await, 1);
}

#[tokio::test]
async fn get_restaurants_lets_page_override_query_and_keeps_query() {
    let fx = fixture().await;
    fx.api.auth().await.expect("auth");

    let query = params(&[("cuisine", "Bakery"), ("page", "9")]);
    let page = fx
        .api
        .get_restaurants(params(&[("page", "2")]), query.clone())
        .await
        .expect("restaurants")
        .expect("not cancelled");

    assert_eq!(
        fx.backend.last_params().await,
        params(&[("cuisine", "Bakery"), ("page", "2")])
    );
    assert_eq!(page.query, query);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.meta.get("total"), Some(&json!(1)));
    assert_eq!(fx.store.state().restaurants, page);
}

#[tokio::test]
async fn get_restaurant_upserts_without_dropping_others() {
    let fx = fixture_with(state_with_restaurant("y", Vec::new()), |_| {}).await;
    fx.api.auth().await.expect("auth");

    let restaurant = fx
        .api
        .get_restaurant(RestaurantId::from("x"))
        .await
        .expect("restaurant")
        .expect("not cancelled");

    assert_eq!(fx.backend.last_params().await, params(&[("id", "x")]));
    assert_eq!(restaurant.details.get("borough"), Some(&json!("Bronx")));
    let state = fx.store.state();
    assert_eq!(state.restaurants_by_id.len(), 2);
    assert_eq!(state.restaurant(&RestaurantId::from("x")), Some(&restaurant));
}

#[tokio::test]
async fn cancelling_get_restaurants_aborts_without_dispatch() {
    let fx = fixture().await;
    fx.api.auth().await.expect("auth");

    let pending = fx
        .api
        .get_restaurants(QueryParams::new(), params(&[("slow", "1")]));
    wait_until(&fx.store, |state| state.in_flight == 1).await;

    pending.cancel();
    assert_eq!(pending.await.expect("abort is swallowed"), None);

    wait_until(&fx.store, |state| state.in_flight == 0).await;
    let state = fx.store.state();
    assert_eq!(state.restaurants, RestaurantsPage::default());
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn cancel_handle_outlives_the_query_value() {
    let fx = fixture().await;
    fx.api.auth().await.expect("auth");

    let pending = fx
        .api
        .get_restaurants(QueryParams::new(), params(&[("slow", "1")]));
    let cancel = pending.cancel_handle();
    wait_until(&fx.store, |state| state.in_flight == 1).await;

    cancel.cancel();
    assert_eq!(pending.await.expect("abort is swallowed"), None);
    wait_until(&fx.store, |state| state.in_flight == 0).await;
}

#[tokio::test]
async fn http_errors_propagate_and_are_reported() {
    let fx = fixture().await;
    fx.backend.fail_queries.store(true, Ordering::SeqCst);
    fx.api.auth().await.expect("auth");

    let err = fx.api.get_cuisines().await.expect_err("500 propagates");

    assert_eq!(
        err.status(),
        Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR)
    );
    let state = fx.store.state();
    assert!(state.cuisines.is_empty());
    assert_eq!(state.in_flight, 0);
    let report = state.last_error.clone().expect("reported");
    assert_eq!(report.kind, ErrorKind::Status);
    assert_eq!(report.status, Some(500));
    assert_eq!(report.operation, "get_cuisines");
}

#[tokio::test]
async fn create_review_applies_locally_before_network() {
    let fx = fixture_with(state_with_restaurant("x", Vec::new()), |_| {}).await;

    // applied at call time, even before authentication completes
    let create = fx.api.create_review(review("r1", "x", "tasty"));
    assert_eq!(review_ids(&fx.store.state(), "x"), vec!["r1"]);
    assert_eq!(fx.backend.hit_count("POST /reviews").await, 0);

    fx.api.auth().await.expect("auth");
    create.await.expect("create");

    assert_eq!(fx.backend.hit_count("POST /reviews").await, 1);
    let body = fx.backend.last_body().await;
    assert_eq!(body["id"], json!("r1"));
    assert_eq!(body["restaurantId"], json!("x"));
    assert_eq!(body["userId"], json!("u-1"));
    assert_eq!(fx.store.state().in_flight, 0);
}

#[tokio::test]
async fn failed_create_review_is_rolled_back() {
    let fx = fixture_with(state_with_restaurant("x", Vec::new()), |_| {}).await;
    fx.backend.fail_reviews.store(true, Ordering::SeqCst);
    fx.api.auth().await.expect("auth");

    let err = fx
        .api
        .create_review(review("r1", "x", "tasty"))
        .await
        .expect_err("create fails");

    assert_eq!(
        err.status(),
        Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR)
    );
    let state = fx.store.state();
    assert!(review_ids(&state, "x").is_empty());
    assert_eq!(
        state.last_error.as_ref().map(|report| report.operation.as_str()),
        Some("create_review")
    );
}

#[tokio::test]
async fn failed_create_keeps_existing_review_with_same_id() {
    let fx = fixture_with(state_with_restaurant("x", vec![review("r1", "x", "old")]), |_| {}).await;
    fx.backend.fail_reviews.store(true, Ordering::SeqCst);
    fx.api.auth().await.expect("auth");

    fx.api
        .create_review(review("r1", "x", "duplicate"))
        .await
        .expect_err("create fails");

    let state = fx.store.state();
    assert_eq!(review_ids(&state, "x"), vec!["r1"]);
    assert_eq!(review_text(&state, "x", "r1"), "old");
}

#[tokio::test]
async fn dropped_create_still_posts_and_rolls_back() {
    let fx = fixture_with(state_with_restaurant("x", Vec::new()), |_| {}).await;
    fx.backend.fail_reviews.store(true, Ordering::SeqCst);
    fx.api.auth().await.expect("auth");

    drop(fx.api.create_review(review("r1", "x", "tasty")));
    assert_eq!(review_ids(&fx.store.state(), "x"), vec!["r1"]);

    wait_until(&fx.store, |state| state.last_error.is_some()).await;
    let state = fx.store.state();
    assert!(review_ids(&state, "x").is_empty());
    assert_eq!(state.in_flight, 0);
    assert_eq!(fx.backend.hit_count("POST /reviews").await, 1);
}

#[tokio::test]
async fn update_review_sends_changes_without_ids() {
    let fx = fixture_with(
        state_with_restaurant("x", vec![review("r1", "x", "old"), review("r2", "x", "other")]),
        |_| {},
    )
    .await;
    fx.api.auth().await.expect("auth");

    fx.api
        .update_review(review("r1", "x", "updated"))
        .await
        .expect("update");

    assert_eq!(
        fx.backend.last_params().await,
        params(&[("id", "r1"), ("userId", "u-1")])
    );
    let body = fx.backend.last_body().await;
    assert!(body.get("id").is_none());
    assert!(body.get("userId").is_none());
    assert_eq!(body["text"], json!("updated"));

    let state = fx.store.state();
    assert_eq!(review_ids(&state, "x"), vec!["r1", "r2"]);
    assert_eq!(review_text(&state, "x", "r1"), "updated");
}

#[tokio::test]
async fn failed_update_restores_previous_version() {
    let fx = fixture_with(
        state_with_restaurant("x", vec![review("r2", "x", "other"), review("r1", "x", "old")]),
        |_| {},
    )
    .await;
    fx.backend.fail_reviews.store(true, Ordering::SeqCst);
    fx.api.auth().await.expect("auth");

    let update = fx.api.update_review(review("r1", "x", "updated"));
    assert_eq!(review_text(&fx.store.state(), "x", "r1"), "updated");
    assert_eq!(review_ids(&fx.store.state(), "x"), vec!["r1", "r2"]);
    update.await.expect_err("update fails");

    let state = fx.store.state();
    assert_eq!(review_ids(&state, "x"), vec!["r2", "r1"]);
    assert_eq!(review_text(&state, "x", "r1"), "old");
}

#[tokio::test]
async fn failed_update_keeps_a_newer_confirmed_edit() {
    let fx = fixture_with(
        state_with_restaurant("x", vec![review("r1", "x", "old"), review("r2", "x", "other")]),
        |_| {},
    )
    .await;
    fx.api.auth().await.expect("auth");

    let rejected = fx.api.update_review(review("r1", "x", "rejected"));
    let confirmed = fx.api.update_review(review("r1", "x", "confirmed"));
    confirmed.await.expect("second update");
    let err = rejected.await.expect_err("first update fails");

    assert_eq!(
        err.status(),
        Some(reqwest::StatusCode::UNPROCESSABLE_ENTITY)
    );
    let state = fx.store.state();
    assert_eq!(review_ids(&state, "x"), vec!["r1", "r2"]);
    assert_eq!(review_text(&state, "x", "r1"), "confirmed");
    assert_eq!(
        state.last_error.as_ref().map(|report| report.operation.as_str()),
        Some("update_review")
    );
}

#[tokio::test]
async fn failed_update_of_unloaded_review_removes_it() {
    let fx = fixture_with(state_with_restaurant("x", Vec::new()), |_| {}).await;
    fx.backend.fail_reviews.store(true, Ordering::SeqCst);
    fx.api.auth().await.expect("auth");

    fx.api
        .update_review(review("r9", "x", "new"))
        .await
        .expect_err("update fails");

    assert!(review_ids(&fx.store.state(), "x").is_empty());
}

#[tokio::test]
async fn delete_review_removes_locally_and_remotely() {
    let fx = fixture_with(
        state_with_restaurant("x", vec![review("r1", "x", "a"), review("r2", "x", "b")]),
        |_| {},
    )
    .await;
    fx.api.auth().await.expect("auth");

    fx.api
        .delete_review(ReviewId::from("r2"), UserId::from("u-1"), RestaurantId::from("x"))
        .await
        .expect("delete");

    assert_eq!(fx.backend.hit_count("DELETE /reviews").await, 1);
    assert_eq!(
        fx.backend.last_params().await,
        params(&[("id", "r2"), ("userId", "u-1")])
    );
    assert_eq!(review_ids(&fx.store.state(), "x"), vec!["r1"]);
}

#[tokio::test]
async fn failed_delete_restores_review() {
    let fx = fixture_with(
        state_with_restaurant("x", vec![review("r1", "x", "a"), review("r2", "x", "b")]),
        |_| {},
    )
    .await;
    fx.backend.fail_reviews.store(true, Ordering::SeqCst);
    fx.api.auth().await.expect("auth");

    let delete = fx.api.delete_review(
        ReviewId::from("r2"),
        UserId::from("u-1"),
        RestaurantId::from("x"),
    );
    assert_eq!(review_ids(&fx.store.state(), "x"), vec!["r1"]);
    delete.await.expect_err("delete fails");

    let state = fx.store.state();
    assert_eq!(review_ids(&state, "x"), vec!["r1", "r2"]);
    assert_eq!(review_text(&state, "x", "r2"), "b");
}

#[tokio::test]
async fn concurrent_refreshes_issue_one_request() {
    let fx = fixture().await;
    fx.api.auth().await.expect("auth");
    let tokens = fx.api.tokens().await.expect("tokens");

    let (first, second) = tokio::join!(
        fx.api.auth_refresh(tokens.clone()),
        fx.api.auth_refresh(tokens.clone()),
    );

    assert_eq!(fx.backend.hit_count("POST /auth/refresh").await, 1);
    assert!(matches!(first.expect("first"), RefreshOutcome::Refreshed(_)));
    assert!(matches!(second.expect("second"), RefreshOutcome::Joined(_)));
    assert_eq!(
        fx.backend.authorization_for("POST /auth/refresh").await.as_deref(),
        Some("Bearer anon-refresh")
    );

    let refreshed = fx.api.tokens().await.expect("tokens");
    assert_eq!(refreshed.access_token, "refreshed-access-1");
    assert_eq!(refreshed.refresh_token, "anon-refresh");
    assert_eq!(refreshed.extra.get("user_id"), Some(&json!("u-anon")));

    fx.api
        .get_cuisines()
        .await
        .expect("cuisines")
        .expect("not cancelled");
    assert_eq!(
        fx.backend.authorization_for("GET /cuisines").await.as_deref(),
        Some("Bearer refreshed-access-1")
    );

    let third = fx.api.auth_refresh(refreshed).await.expect("third");
    assert_eq!(third, RefreshOutcome::Skipped);
    assert_eq!(fx.backend.hit_count("POST /auth/refresh").await, 1);
}

#[tokio::test]
async fn refresh_after_cooldown_issues_new_request() {
    let fx = fixture_with(ApplicationState::default(), |settings| {
        settings.refresh_cooldown = Duration::from_millis(200);
    })
    .await;
    fx.api.auth().await.expect("auth");
    let tokens = fx.api.tokens().await.expect("tokens");

    let first = fx.api.auth_refresh(tokens.clone()).await.expect("first");
    assert!(matches!(first, RefreshOutcome::Refreshed(_)));
    let skipped = fx.api.auth_refresh(tokens.clone()).await.expect("second");
    assert_eq!(skipped, RefreshOutcome::Skipped);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let again = fx.api.auth_refresh(tokens).await.expect("third");
    assert_eq!(
        again.value().map(|tokens| tokens.access_token.as_str()),
        Some("refreshed-access-2")
    );
    assert_eq!(fx.backend.hit_count("POST /auth/refresh").await, 2);
}

#[tokio::test]
async fn failed_refresh_releases_the_guard() {
    let fx = fixture().await;
    fx.backend.fail_refresh.store(true, Ordering::SeqCst);
    fx.api.auth().await.expect("auth");
    let tokens = fx.api.tokens().await.expect("tokens");

    let err = fx
        .api
        .auth_refresh(tokens.clone())
        .await
        .expect_err("refresh rejected");
    assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
    assert_eq!(
        fx.store
            .state()
            .last_error
            .as_ref()
            .map(|report| report.operation.clone()),
        Some("auth_refresh".to_string())
    );

    fx.backend.fail_refresh.store(false, Ordering::SeqCst);
    let retried = fx.api.auth_refresh(tokens).await.expect("retry");
    assert!(matches!(retried, RefreshOutcome::Refreshed(_)));
    assert_eq!(fx.backend.hit_count("POST /auth/refresh").await, 2);
    assert_eq!(
        fx.api.tokens().await.expect("tokens").access_token,
        "refreshed-access-1"
    );
}
