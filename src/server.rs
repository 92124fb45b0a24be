//! HTTP surface for the companion.
//!
//! Exposes the knowledge-base CRUD operations, the guarded ask pipeline,
//! and maintenance actions as a JSON API. Any frontend (the form UI, a
//! script, curl) drives the core through these endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/profile` | The full knowledge base |
//! | `PUT`  | `/profile` | Replace the user profile |
//! | `POST` | `/skills` | Add skills to a category |
//! | `DELETE` | `/skills/{category}` | Remove a skill category |
//! | `POST` | `/projects` | Add a project |
//! | `DELETE` | `/projects/{index}` | Remove a project by position |
//! | `POST` | `/activities` | Add an activity |
//! | `DELETE` | `/activities/{index}` | Remove an activity by position |
//! | `POST` | `/ask` | Run the retrieval-augmented ask pipeline |
//! | `POST` | `/index/rebuild` | Rebuild the vector index |
//! | `POST` | `/history/clear` | Clear a session's conversation history |
//! | `GET`  | `/stats` | Knowledge, index, and session statistics |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "rate_limited", "message": "..." } }
//! ```
//!
//! Codes map to status: `validation_error`/`unsafe_content` → 400,
//! `not_found` → 404, `empty_index` → 409, `rate_limited` → 429,
//! `llm_unavailable` → 502, `internal` → 500.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::agent::{self, Plan};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::Config;
use crate::error::{CompanionError, LLM_FAILURE_MESSAGE};
use crate::guardrails::Guardrails;
use crate::index::VectorIndex;
use crate::models::{ActivityRecord, KnowledgeBase, ProjectRecord, ScoredChunk, UserProfile};
use crate::session::{SessionContext, SessionStats};
use crate::stats;
use crate::store::{self, KnowledgeStore};

const DEFAULT_SESSION: &str = "default";

/// Sessions with no turn inside this window are dropped, along with
/// their rate-limit state, on the next ask.
const SESSION_IDLE_SECS: i64 = 3600;

/// Everything behind the single state lock: one process, one active
/// session is the model, so one async mutex is the whole concurrency
/// story.
struct App {
    store: KnowledgeStore,
    kb: KnowledgeBase,
    index: VectorIndex,
    guardrails: Guardrails,
    cache: ResponseCache,
    sessions: HashMap<String, SessionContext>,
}

impl App {
    /// Rebuild the index when it is missing or its stamp no longer
    /// matches the knowledge document, and persist the fresh artifacts.
    async fn ensure_fresh_index(&mut self, config: &Config) -> anyhow::Result<()> {
        let hash = store::content_hash(&self.kb);
        if self.index.is_empty() || self.index.is_stale(&hash) {
            info!("index missing or stale; rebuilding");
            self.index
                .rebuild(&config.embedding, &config.chunking, &self.kb)
                .await?;
            self.index.save(&config.data.dir)?;
        }
        Ok(())
    }

    /// Persist the knowledge document after a mutation. The index is
    /// left stale on purpose; the next ask or an explicit rebuild
    /// refreshes it.
    fn persist(&self) -> anyhow::Result<()> {
        self.store.save(&self.kb)
    }

    /// Drop sessions idle past [`SESSION_IDLE_SECS`], together with
    /// their rate-limit state. Called on the ask path so both maps stay
    /// bounded by the set of recently active sessions.
    fn evict_idle_sessions(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(SESSION_IDLE_SECS);
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.last_seen() < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            info!(session = %id, "evicting idle session");
            self.sessions.remove(&id);
            self.guardrails.reset_session(&id);
        }
        self.guardrails.prune_idle_at(Instant::now());
    }
}

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    app: Arc<Mutex<App>>,
}

/// Assemble the full router over freshly loaded state. Split from
/// [`run_server`] so the routing and error contract can be exercised
/// without binding a socket.
pub fn build_router(config: &Config) -> anyhow::Result<Router> {
    let store = KnowledgeStore::new(config.data.knowledge_path());
    let kb = store.load()?;
    let index = VectorIndex::load(&config.data.dir)?.unwrap_or_default();

    let state = AppState {
        config: Arc::new(config.clone()),
        app: Arc::new(Mutex::new(App {
            store,
            kb,
            index,
            guardrails: Guardrails::new(&config.guardrails),
            cache: ResponseCache::new(&config.cache),
            sessions: HashMap::new(),
        })),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(handle_health))
        .route("/profile", get(handle_get_knowledge))
        .route("/profile", put(handle_put_profile))
        .route("/skills", post(handle_add_skills))
        .route("/skills/{category}", delete(handle_remove_skill_category))
        .route("/projects", post(handle_add_project))
        .route("/projects/{index}", delete(handle_remove_project))
        .route("/activities", post(handle_add_activity))
        .route("/activities/{index}", delete(handle_remove_activity))
        .route("/ask", post(handle_ask))
        .route("/index/rebuild", post(handle_rebuild))
        .route("/history/clear", post(handle_clear_history))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(state);

    Ok(router)
}

/// Start the HTTP server on `[server].bind`; runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let router = build_router(config)?;

    let bind_addr = &config.server.bind;
    info!(addr = %bind_addr, "companion server listening");
    println!("Companion server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// Map pipeline failures to HTTP statuses by downcasting to the typed
/// error kinds instead of matching on message text.
fn classify_error(err: anyhow::Error) -> AppError {
    let (status, code) = match err.downcast_ref::<CompanionError>() {
        Some(e @ CompanionError::Validation(_)) => (StatusCode::BAD_REQUEST, e.code()),
        Some(e @ CompanionError::UnsafeContent(_)) => (StatusCode::BAD_REQUEST, e.code()),
        Some(e @ CompanionError::EmptyIndex) => (StatusCode::CONFLICT, e.code()),
        Some(e @ CompanionError::RateLimited(_)) => (StatusCode::TOO_MANY_REQUESTS, e.code()),
        Some(e @ CompanionError::LlmUnavailable(_)) => (StatusCode::BAD_GATEWAY, e.code()),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };

    // The agent never retries a failed model call; the user sees one
    // fixed message instead of transport details.
    let message = if code == "llm_unavailable" {
        LLM_FAILURE_MESSAGE.to_string()
    } else {
        err.to_string()
    };

    AppError {
        status,
        code: code.to_string(),
        message,
    }
}

// ============ Health & knowledge CRUD ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_get_knowledge(State(state): State<AppState>) -> Json<KnowledgeBase> {
    let app = state.app.lock().await;
    Json(app.kb.clone())
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

const OK: OkResponse = OkResponse { ok: true };

async fn handle_put_profile(
    State(state): State<AppState>,
    Json(profile): Json<UserProfile>,
) -> Result<Json<OkResponse>, AppError> {
    let mut app = state.app.lock().await;
    store::set_profile(&mut app.kb, profile).map_err(classify_error)?;
    app.persist().map_err(classify_error)?;
    Ok(Json(OK))
}

#[derive(Deserialize)]
struct AddSkillsRequest {
    category: String,
    skills: Vec<String>,
}

async fn handle_add_skills(
    State(state): State<AppState>,
    Json(req): Json<AddSkillsRequest>,
) -> Result<Json<OkResponse>, AppError> {
    let mut app = state.app.lock().await;
    store::add_skills(&mut app.kb, &req.category, req.skills).map_err(classify_error)?;
    app.persist().map_err(classify_error)?;
    Ok(Json(OK))
}

async fn handle_remove_skill_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<OkResponse>, AppError> {
    let mut app = state.app.lock().await;
    store::remove_skill_category(&mut app.kb, &category)
        .map_err(|_| not_found(format!("no skill category named {}", category)))?;
    app.persist().map_err(classify_error)?;
    Ok(Json(OK))
}

async fn handle_add_project(
    State(state): State<AppState>,
    Json(project): Json<ProjectRecord>,
) -> Result<Json<OkResponse>, AppError> {
    let mut app = state.app.lock().await;
    store::add_project(&mut app.kb, project).map_err(classify_error)?;
    app.persist().map_err(classify_error)?;
    Ok(Json(OK))
}

async fn handle_remove_project(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<OkResponse>, AppError> {
    let mut app = state.app.lock().await;
    store::remove_project(&mut app.kb, index)
        .map_err(|_| not_found(format!("no project at index {}", index)))?;
    app.persist().map_err(classify_error)?;
    Ok(Json(OK))
}

async fn handle_add_activity(
    State(state): State<AppState>,
    Json(activity): Json<ActivityRecord>,
) -> Result<Json<OkResponse>, AppError> {
    let mut app = state.app.lock().await;
    store::add_activity(&mut app.kb, activity).map_err(classify_error)?;
    app.persist().map_err(classify_error)?;
    Ok(Json(OK))
}

async fn handle_remove_activity(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<OkResponse>, AppError> {
    let mut app = state.app.lock().await;
    store::remove_activity(&mut app.kb, index)
        .map_err(|_| not_found(format!("no activity at index {}", index)))?;
    app.persist().map_err(classify_error)?;
    Ok(Json(OK))
}

// ============ Ask pipeline ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    plan: Plan,
    context: Vec<ScoredChunk>,
    session_id: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(classify_error(
            CompanionError::Validation("question must not be empty".into()).into(),
        ));
    }
    let session_id = req
        .session_id
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());

    let mut guard = state.app.lock().await;
    let app = &mut *guard;

    app.evict_idle_sessions(Utc::now());
    app.ensure_fresh_index(&state.config)
        .await
        .map_err(classify_error)?;

    let max_history = state.config.agent.max_history;
    let session = app
        .sessions
        .entry(session_id.clone())
        .or_insert_with(|| SessionContext::new(max_history));

    let outcome = agent::ask(
        &state.config,
        &session_id,
        session,
        &mut app.guardrails,
        &mut app.cache,
        &app.index,
        &req.question,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(AskResponse {
        answer: outcome.answer,
        plan: outcome.plan,
        context: outcome.context,
        session_id,
    }))
}

// ============ Maintenance ============

#[derive(Serialize)]
struct RebuildResponse {
    chunks: usize,
}

async fn handle_rebuild(
    State(state): State<AppState>,
) -> Result<Json<RebuildResponse>, AppError> {
    let mut app = state.app.lock().await;
    let kb = app.kb.clone();
    let chunks = app
        .index
        .rebuild(&state.config.embedding, &state.config.chunking, &kb)
        .await
        .map_err(classify_error)?;
    app.index
        .save(&state.config.data.dir)
        .map_err(classify_error)?;
    Ok(Json(RebuildResponse { chunks }))
}

#[derive(Deserialize, Default)]
struct ClearHistoryRequest {
    #[serde(default)]
    session_id: Option<String>,
}

async fn handle_clear_history(
    State(state): State<AppState>,
    Json(req): Json<ClearHistoryRequest>,
) -> Json<OkResponse> {
    let session_id = req
        .session_id
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());
    let mut app = state.app.lock().await;
    if let Some(session) = app.sessions.get_mut(&session_id) {
        session.clear();
    }
    app.guardrails.reset_session(&session_id);
    Json(OK)
}

#[derive(Serialize)]
struct StatsResponse {
    knowledge: stats::CompanionStats,
    cache: CacheStats,
    sessions: HashMap<String, SessionStats>,
}

async fn handle_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let app = state.app.lock().await;
    let knowledge = stats::collect(&app.kb, &app.index);
    let sessions = app
        .sessions
        .iter()
        .map(|(id, s)| (id.clone(), s.stats()))
        .collect();
    Json(StatsResponse {
        knowledge,
        cache: app.cache.stats(),
        sessions,
    })
}
