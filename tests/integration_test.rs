use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use playfeed::creator::{Creator, CreatorDraft};
use playfeed::gateway::{MemoryGateway, SupabaseConfig, SupabaseGateway};
use playfeed::llm::{GenerationRequest, LlmConfig, ProviderKind};
use playfeed::notice::{NoticeKind, Notices};
use playfeed::session::{SessionIdentity, StaticAuth, SupabaseAuth};
use playfeed::state::AppState;
use playfeed::sync::start_identity_sync;
use playfeed::types::{GamePatch, GameStatus, NewGame};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Minimal stand-in for a Supabase project: GoTrue password grant plus
/// the PostgREST tables the app uses
#[derive(Clone, Default)]
struct Backend {
    store: Arc<Mutex<Store>>,
}

#[derive(Default)]
struct Store {
    games: Vec<Value>,
    memberships: HashSet<(String, String, String)>,
    plays: Vec<Value>,
    /// "<METHOD> <table>" per request
    hits: Vec<String>,
    /// Held before answering a games listing
    catalog_delay: Option<Duration>,
}

impl Backend {
    async fn hits(&self, needle: &str) -> usize {
        self.store
            .lock()
            .await
            .hits
            .iter()
            .filter(|hit| hit.as_str() == needle)
            .count()
    }

    async fn seed(&self, row: Value) {
        self.store.lock().await.games.push(row);
    }
}

fn eq_value(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.strip_prefix("eq."))
        .map(str::to_string)
}

async fn token(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["email"] == "alice@example.com" && body["password"] == "secret" {
        (
            StatusCode::OK,
            Json(json!({
                "access_token": "jwt-alice",
                "refresh_token": "refresh-alice",
                "expires_at": 1_900_000_000,
                "user": {
                    "id": "u-1",
                    "email": "alice@example.com",
                    "user_metadata": { "username": "alice" }
                }
            })),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error_description": "Invalid login credentials" })),
        )
    }
}

async fn list_games(State(backend): State<Backend>) -> Json<Value> {
    let (mut games, delay) = {
        let mut store = backend.store.lock().await;
        store.hits.push("GET games".to_string());
        (store.games.clone(), store.catalog_delay)
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    games.sort_by(|a, b| {
        b["created_at"]
            .as_str()
            .unwrap_or_default()
            .cmp(a["created_at"].as_str().unwrap_or_default())
    });
    Json(Value::Array(games))
}

async fn insert_game(
    State(backend): State<Backend>,
    Json(mut row): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut store = backend.store.lock().await;
    store.hits.push("POST games".to_string());
    if row["title"] == "forbidden" {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "message": "new row violates row-level security policy" })),
        );
    }

    row["id"] = json!(format!("srv-{}", store.games.len() + 1));
    row["likes_count"] = json!(0);
    row["profiles"] = json!({ "username": "alice" });
    store.games.push(row.clone());
    (StatusCode::CREATED, Json(row))
}

async fn patch_game(
    State(backend): State<Backend>,
    Query(params): Query<HashMap<String, String>>,
    Json(patch): Json<Value>,
) -> StatusCode {
    let mut store = backend.store.lock().await;
    store.hits.push("PATCH games".to_string());
    let id = eq_value(&params, "id");
    if let Some(row) = store
        .games
        .iter_mut()
        .find(|row| row["id"].as_str() == id.as_deref())
    {
        if let (Some(row), Some(patch)) = (row.as_object_mut(), patch.as_object()) {
            for (key, value) in patch {
                row.insert(key.clone(), value.clone());
            }
        }
    }
    StatusCode::NO_CONTENT
}

async fn list_relation(
    State(backend): State<Backend>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut store = backend.store.lock().await;
    store.hits.push(format!("GET {}", table));
    let user = eq_value(&params, "user_id").unwrap_or_default();
    let rows: Vec<Value> = store
        .memberships
        .iter()
        .filter(|(t, u, _)| *t == table && *u == user)
        .map(|(_, _, game)| json!({ "game_id": game }))
        .collect();
    Json(Value::Array(rows))
}

async fn insert_relation(
    State(backend): State<Backend>,
    Path(table): Path<String>,
    Json(row): Json<Value>,
) -> StatusCode {
    let mut store = backend.store.lock().await;
    store.hits.push(format!("POST {}", table));
    if table == "plays" {
        store.plays.push(row);
    } else {
        let user = row["user_id"].as_str().unwrap_or_default().to_string();
        let game = row["game_id"].as_str().unwrap_or_default().to_string();
        store.memberships.insert((table, user, game));
    }
    StatusCode::CREATED
}

async fn delete_relation(
    State(backend): State<Backend>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> StatusCode {
    let mut store = backend.store.lock().await;
    store.hits.push(format!("DELETE {}", table));
    let user = eq_value(&params, "user_id").unwrap_or_default();
    let game = eq_value(&params, "game_id").unwrap_or_default();
    store.memberships.remove(&(table, user, game));
    StatusCode::NO_CONTENT
}

async fn serve_backend(backend: Backend) -> String {
    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route(
            "/rest/v1/games",
            get(list_games).post(insert_game).patch(patch_game),
        )
        .route(
            "/rest/v1/{table}",
            get(list_relation)
                .post(insert_relation)
                .delete(delete_relation),
        )
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

struct Harness {
    state: AppState,
    session: Arc<SessionIdentity>,
    backend: Backend,
}

/// State wired to the mock project exactly as the binary wires it
async fn connect(backend: Backend) -> Harness {
    let url = serve_backend(backend.clone()).await;
    let config = SupabaseConfig::new(url, "anon-key");

    let session = Arc::new(SessionIdentity::new(Arc::new(
        SupabaseAuth::new(config.clone()).unwrap(),
    )));
    let gateway = SupabaseGateway::new(config, session.bearer()).unwrap();
    let state = AppState::new(session.clone(), Arc::new(gateway), Notices::new());

    Harness {
        state,
        session,
        backend,
    }
}

fn new_game(title: &str, status: GameStatus) -> NewGame {
    NewGame {
        placeholder_id: Some("1714557600000".to_string()),
        title: title.to_string(),
        description: "prompt".to_string(),
        thumbnail_url: None,
        code: "<html></html>".to_string(),
        created_at: 1_714_557_600_000,
        status: Some(status),
    }
}

fn memory_state() -> (AppState, Arc<MemoryGateway>, Arc<SessionIdentity>) {
    let gateway = Arc::new(MemoryGateway::new());
    let session = Arc::new(SessionIdentity::new(Arc::new(
        StaticAuth::new().with_account("alice@example.com", "secret", "u-1", "alice"),
    )));
    let state = AppState::new(session.clone(), gateway.clone(), Notices::new());
    (state, gateway, session)
}

#[tokio::test]
async fn test_anonymous_and_guest_writes_stay_local() {
    let (state, gateway, session) = memory_state();
    let id = "g-1".to_string();

    for guest in [false, true] {
        if guest {
            session.enter_as_guest().await;
        }

        assert!(!state.add_game(new_game("T", GameStatus::Published)).await);
        state
            .update_game(
                &id,
                GamePatch {
                    title: Some("x".to_string()),
                    ..Default::default()
                },
            )
            .await;
        state.delete_game(&id).await;
        state.toggle_like(&id).await;
        state.toggle_save(&id).await;
    }

    assert_eq!(gateway.call_count().await, 0);
    assert!(state.games().await.is_empty());
    assert!(state.liked_ids().await.is_empty());
    assert!(state.saved_ids().await.is_empty());
}

#[tokio::test]
async fn test_draft_round_trip_through_rest_backend() {
    let h = connect(Backend::default()).await;
    h.session
        .sign_in_with_email("alice@example.com", "secret")
        .await
        .unwrap();

    assert!(h.state.add_game(new_game("T", GameStatus::Draft)).await);

    let games = h.state.games().await;
    assert_eq!(games.len(), 1);
    assert_eq!(games[0].id, "srv-1");
    assert_eq!(games[0].status, Some(GameStatus::Draft));
    assert!(h.state.published_games().await.is_empty());
    assert_eq!(h.state.draft_games().await.len(), 1);

    // The stored row carries no publish timestamp for drafts
    let stored = h.backend.store.lock().await.games[0].clone();
    assert!(stored["published_at"].is_null());
    assert_eq!(stored["author_id"], "u-1");
    assert_eq!(stored["created_at"], "2024-05-01T10:00:00.000Z");

    // Publishing through the creator flips the feed membership
    let editing = CreatorDraft::editing(&games[0]);
    let creator = Creator::new(LlmConfig::default().build_provider(), h.state.clone());
    assert!(creator.save(&editing, GameStatus::Published).await);
    assert_eq!(h.state.published_games().await.len(), 1);
    assert_eq!(
        h.backend.store.lock().await.games[0]["status"],
        "published"
    );

    // A fresh catalog fetch agrees with memory
    h.state.refresh_catalog().await;
    let refreshed = h.state.games().await;
    assert_eq!(refreshed[0].id, "srv-1");
    assert_eq!(refreshed[0].author_name, "alice");
}

#[tokio::test]
async fn test_failed_insert_leaves_catalog_length() {
    let h = connect(Backend::default()).await;
    h.session
        .sign_in_with_email("alice@example.com", "secret")
        .await
        .unwrap();
    assert!(h.state.add_game(new_game("ok", GameStatus::Published)).await);
    let mut notices = h.state.notices().subscribe();

    assert!(!h.state.add_game(new_game("forbidden", GameStatus::Published)).await);

    assert_eq!(h.state.games().await.len(), 1);
    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.title.as_deref(), Some("Save Failed"));
    assert_eq!(notice.kind, NoticeKind::Error);
    assert!(notice.message.contains("row-level security"));
}

#[tokio::test]
async fn test_like_twice_restores_membership_remotely() {
    let h = connect(Backend::default()).await;
    h.session
        .sign_in_with_email("alice@example.com", "secret")
        .await
        .unwrap();
    let id = "g-9".to_string();

    h.state.toggle_like(&id).await;
    assert!(h.state.is_liked(&id).await);
    assert!(h
        .backend
        .store
        .lock()
        .await
        .memberships
        .contains(&("likes".to_string(), "u-1".to_string(), id.clone())));

    h.state.toggle_like(&id).await;
    assert!(!h.state.is_liked(&id).await);
    assert!(h.backend.store.lock().await.memberships.is_empty());
    assert_eq!(h.backend.hits("POST likes").await, 1);
    assert_eq!(h.backend.hits("DELETE likes").await, 1);
}

#[tokio::test]
async fn test_like_is_visible_while_request_is_pending() {
    let (state, gateway, session) = memory_state();
    session
        .sign_in_with_email("alice@example.com", "secret")
        .await
        .unwrap();
    gateway.pause();

    let pending = {
        let state = state.clone();
        tokio::spawn(async move { state.toggle_like(&"g-1".to_string()).await })
    };
    while gateway.call_count().await == 0 {
        tokio::task::yield_now().await;
    }

    assert!(state.is_liked("g-1").await);
    gateway.resume();
    pending.await.unwrap();
    assert!(state.is_liked("g-1").await);
}

#[tokio::test]
async fn test_feed_filters_follow_status() {
    let backend = Backend::default();
    for (id, status, created) in [
        ("a", json!("published"), "2024-05-03T00:00:00Z"),
        ("b", json!("draft"), "2024-05-02T00:00:00Z"),
        ("c", Value::Null, "2024-05-01T00:00:00Z"),
    ] {
        backend
            .seed(json!({
                "id": id,
                "title": id,
                "author_id": "u-2",
                "created_at": created,
                "status": status,
                "profiles": { "username": "bob" }
            }))
            .await;
    }
    let h = connect(backend).await;

    h.state.refresh_catalog().await;

    let ids = |games: Vec<playfeed::types::Game>| games.into_iter().map(|g| g.id).collect::<Vec<_>>();
    assert_eq!(ids(h.state.games().await), vec!["a", "b", "c"]);
    assert_eq!(ids(h.state.published_games().await), vec!["a", "c"]);
    assert_eq!(ids(h.state.draft_games().await), vec!["b"]);
}

#[tokio::test]
async fn test_switch_to_guest_clears_memberships_without_fetching() {
    let backend = Backend::default();
    backend
        .store
        .lock()
        .await
        .memberships
        .insert(("likes".to_string(), "u-1".to_string(), "g-1".to_string()));
    let h = connect(backend).await;
    let _sync = start_identity_sync(h.state.clone()).await;

    h.session
        .sign_in_with_email("alice@example.com", "secret")
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !h.state.is_liked("g-1").await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let like_fetches = h.backend.hits("GET likes").await;
    let game_fetches = h.backend.hits("GET games").await;

    // The guest's catalog fetch hangs; memberships must not wait for it
    h.backend.store.lock().await.catalog_delay = Some(Duration::from_millis(500));
    h.session.enter_as_guest().await;
    assert!(h.state.liked_ids().await.is_empty());

    tokio::time::timeout(Duration::from_secs(2), async {
        while h.backend.hits("GET games").await == game_fetches {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(h.state.liked.read().await.is_empty());
    assert!(h.state.saved.read().await.is_empty());
    assert_eq!(h.backend.hits("GET likes").await, like_fetches);
    assert_eq!(h.backend.hits("GET saves").await, like_fetches);
}

#[tokio::test]
async fn test_rate_limited_generation_creates_nothing() {
    let gemini = Router::new().route(
        "/v1beta/models/{action}",
        post(|| async {
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": { "code": 429, "status": "RESOURCE_EXHAUSTED" } })),
            )
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, gemini).await.unwrap();
    });

    let h = connect(Backend::default()).await;
    h.session
        .sign_in_with_email("alice@example.com", "secret")
        .await
        .unwrap();

    let config = LlmConfig {
        provider: ProviderKind::Gemini,
        gemini_api_key: Some("test-key".to_string()),
        gemini_base_url: format!("http://{}", addr),
        ..Default::default()
    };
    let creator = Creator::new(config.build_provider(), h.state.clone());

    let err = creator
        .generate(&GenerationRequest::new("A pong game with tilt controls"))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(429));
    assert!(h.state.games().await.is_empty());
    assert_eq!(h.backend.hits("POST games").await, 0);
    assert_eq!(h.backend.hits("PATCH games").await, 0);
}

#[tokio::test]
async fn test_plays_are_recorded_with_and_without_user() {
    let h = connect(Backend::default()).await;
    let id = "g-1".to_string();

    h.state.record_play(&id).await.unwrap();
    h.session
        .sign_in_with_email("alice@example.com", "secret")
        .await
        .unwrap();
    h.state.record_play(&id).await.unwrap();

    let plays = h.backend.store.lock().await.plays.clone();
    assert_eq!(plays.len(), 2);
    assert!(plays[0]["user_id"].is_null());
    assert_eq!(plays[1]["user_id"], "u-1");
}
