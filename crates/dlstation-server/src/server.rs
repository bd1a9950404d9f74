use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    auth::require_session,
    catalog::Catalog,
    handlers::{
        auth_status, change_password, create_file, delete_file, get_file, health, init_database,
        list_categories, list_files, login, logout, record_download, stats, update_file,
    },
    session::SessionStore,
    store::{seed::DEFAULT_ADMIN_PASSWORD, InitOptions, Store},
    AppState,
};

/// Which storage backend the server runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Persistent redb file under the data directory.
    Redb,
    /// Process-local; everything is lost on exit.
    Memory,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redb" | "disk" => Ok(Self::Redb),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend '{other}' (expected redb or memory)")),
        }
    }
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub storage: StorageKind,
    /// Admin password used when the admin row has never been written.
    pub default_password: String,
    pub seed_samples: bool,
    pub cors_origins: Option<String>,
    /// Serve files from this directory for any route the API does not claim.
    pub static_dir: Option<PathBuf>,
    pub session_sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("DLS_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("DLS_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            data_dir: std::env::var("DLS_DATA_DIR").ok().map(PathBuf::from),
            storage: std::env::var("DLS_STORAGE")
                .ok()
                .map(|v| parse_storage_env(&v))
                .unwrap_or(StorageKind::Redb),
            default_password: std::env::var("DLS_DEFAULT_PASSWORD")
                .ok()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_ADMIN_PASSWORD.into()),
            seed_samples: std::env::var("DLS_SEED_SAMPLES")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            cors_origins: std::env::var("DLS_CORS_ORIGINS").ok(),
            static_dir: std::env::var("DLS_STATIC_DIR").ok().map(PathBuf::from),
            session_sweep_interval: Duration::from_secs(
                std::env::var("DLS_SESSION_SWEEP_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }
}

/// Parse `DLS_STORAGE`, falling back to redb with a warning on a typo.
fn parse_storage_env(value: &str) -> StorageKind {
    value.parse().unwrap_or_else(|e: String| {
        warn!(error = %e, "invalid DLS_STORAGE, using redb");
        StorageKind::Redb
    })
}

impl ServerConfig {
    pub fn init_options(&self) -> InitOptions {
        InitOptions {
            default_password: self.default_password.clone(),
            seed_samples: self.seed_samples,
        }
    }
}

/// Resolve the directory holding `dlstation.db`, creating it if needed.
///
/// An explicit directory (`DLS_DATA_DIR`) wins; otherwise the platform data
/// dir is used (`~/.local/share/dlstation/`, etc.).
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let dir = match data_dir {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "dlstation")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data dir: {}", dir.display()))?;
    Ok(dir)
}

/// Open the backend selected by `cfg`.
pub fn open_store(cfg: &ServerConfig) -> Result<Store> {
    match cfg.storage {
        StorageKind::Memory => {
            warn!("using in-memory storage, catalog will not survive a restart");
            Ok(Store::in_memory())
        }
        StorageKind::Redb => {
            let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
            info!(data_dir = %data_dir.display(), "using data directory");
            Store::open(&data_dir.join("dlstation.db")).context("open store")
        }
    }
}

/// All API routes with state applied. CORS and static fallback are added by [`run`].
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/auth/status", get(auth_status))
        .route("/api/check-auth", get(auth_status))
        .route("/api/files", get(list_files))
        .route("/api/files/{id}", get(get_file))
        .route("/api/files/{id}/download", post(record_download))
        .route("/api/categories", get(list_categories))
        .route("/api/stats", get(stats))
        .route("/api/init", get(init_database));

    let protected = Router::new()
        .route("/api/change-password", post(change_password))
        .route("/api/files", post(create_file))
        .route("/api/files/{id}", put(update_file))
        .route("/api/files/{id}", delete(delete_file))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let store = open_store(&cfg)?;

    let sessions = SessionStore::new();
    // DLS_SESSION_SWEEP_SECS=0 leaves eviction to lookups only.
    if !cfg.session_sweep_interval.is_zero() {
        sessions.clone().spawn_sweep(cfg.session_sweep_interval);
    }

    let catalog = Catalog::new(store, sessions, cfg.init_options());
    let report = catalog.initialize().context("initialize store")?;
    info!(
        admin_seeded = report.admin_seeded,
        files_seeded = report.files_seeded,
        "store initialized"
    );

    let state = AppState { catalog };

    let mut app = router(state).layer(build_cors(cfg.cors_origins.as_deref()));

    if let Some(dir) = cfg.static_dir.as_ref() {
        if dir.is_dir() {
            info!(static_dir = %dir.display(), "serving static assets");
            app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
        } else {
            warn!(static_dir = %dir.display(), "static directory does not exist, not serving assets");
        }
    }

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "dlstation server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let catalog = Catalog::new(
            Store::in_memory(),
            SessionStore::new(),
            InitOptions::default(),
        );
        catalog.initialize().unwrap();
        router(AppState { catalog })
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn json_req(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            builder = builder.header("x-session-id", t);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(t) = token {
            builder = builder.header("x-session-id", t);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn login_token(app: &Router, password: &str) -> String {
        let (status, body) = send(
            app,
            json_req(
                "POST",
                "/api/login",
                None,
                json!({"username": "admin", "password": password}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["sessionId"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (status, body) = send(&app(), get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn admin_scenario() {
        let app = app();
        let token = login_token(&app, "admin123").await;

        let (status, files) = send(&app, get("/api/files", None)).await;
        assert_eq!(status, StatusCode::OK);
        let seeded = files.as_array().unwrap().len();
        assert!(seeded >= 2);

        let new_file = json!({"name": "a.pdf", "url": "http://x/a.pdf"});
        let (status, _) = send(
            &app,
            json_req("POST", "/api/files", None, new_file.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &app,
            json_req("POST", "/api/files", Some(&token), new_file),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["file"]["category"], "uncategorized");
        assert_eq!(body["file"]["downloads"], 0);

        let (_, files) = send(&app, get("/api/files", None)).await;
        assert_eq!(files.as_array().unwrap().len(), seeded + 1);
        // Newest first.
        assert_eq!(files[0]["name"], "a.pdf");
    }

    #[tokio::test]
    async fn login_failures() {
        let app = app();
        let (status, body) = send(
            &app,
            json_req(
                "POST",
                "/api/login",
                None,
                json!({"username": "admin", "password": "wrong"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert!(body["message"].is_string());

        let (status, body) = send(
            &app,
            json_req("POST", "/api/login", None, json!({"username": "admin"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing_field");
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = app();
        let req = Request::builder()
            .method("POST")
            .uri("/api/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "malformed_request");
    }

    #[tokio::test]
    async fn login_sets_cookie_usable_for_auth() {
        let app = app();
        let req = json_req(
            "POST",
            "/api/login",
            None,
            json!({"username": "admin", "password": "admin123"}),
        );
        let resp = app.clone().oneshot(req).await.unwrap();
        let cookie = resp
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_owned();

        let req = Request::builder()
            .uri("/api/auth/status")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"authenticated": true, "username": "admin"}));
    }

    #[tokio::test]
    async fn auth_status_and_logout() {
        let app = app();
        let (_, body) = send(&app, get("/api/auth/status", None)).await;
        assert_eq!(body, json!({"authenticated": false}));

        let token = login_token(&app, "admin123").await;
        let (_, body) = send(&app, get("/api/check-auth", Some(&token))).await;
        assert_eq!(body["authenticated"], true);

        let (status, body) = send(
            &app,
            json_req("POST", "/api/logout", Some(&token), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (_, body) = send(&app, get("/api/auth/status", Some(&token))).await;
        assert_eq!(body["authenticated"], false);
    }

    #[tokio::test]
    async fn change_password_forces_relogin() {
        let app = app();
        let token = login_token(&app, "admin123").await;

        let (status, body) = send(
            &app,
            json_req(
                "POST",
                "/api/change-password",
                Some(&token),
                json!({"currentPassword": "admin123", "newPassword": "abc"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "weak_password");

        let (status, body) = send(
            &app,
            json_req(
                "POST",
                "/api/change-password",
                Some(&token),
                json!({"currentPassword": "admin123", "newPassword": "n3w-pass"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) = send(
            &app,
            json_req(
                "POST",
                "/api/files",
                Some(&token),
                json!({"name": "x", "url": "http://y"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app,
            json_req(
                "POST",
                "/api/login",
                None,
                json!({"username": "admin", "password": "admin123"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        login_token(&app, "n3w-pass").await;
    }

    #[tokio::test]
    async fn update_delete_and_download() {
        let app = app();
        let token = login_token(&app, "admin123").await;

        let (_, body) = send(
            &app,
            json_req(
                "POST",
                "/api/files",
                Some(&token),
                json!({"name": "tool.zip", "url": "http://x/tool.zip", "size": 2048, "type": "zip"}),
            ),
        )
        .await;
        let id = body["file"]["id"].as_u64().unwrap();
        assert_eq!(body["file"]["type"], "zip");

        let (status, body) = send(
            &app,
            json_req(
                "PUT",
                &format!("/api/files/{id}"),
                Some(&token),
                json!({"name": "tool-v2.zip", "url": "http://x/tool-v2.zip", "category": "software"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["file"]["name"], "tool-v2.zip");

        for expected in 1..=2 {
            let (status, body) = send(
                &app,
                json_req("POST", &format!("/api/files/{id}/download"), None, json!({})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["downloads"], expected);
        }
        let (_, file) = send(&app, get(&format!("/api/files/{id}"), None)).await;
        assert_eq!(file["downloads"], 2);

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/api/files/{id}"))
            .header("x-session-id", &token)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = send(&app, get(&format!("/api/files/{id}"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, _) = send(
            &app,
            json_req("POST", &format!("/api/files/{id}/download"), None, json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_numeric_id_is_bad_request() {
        let app = app();
        let (status, body) = send(&app, get("/api/files/abc", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "malformed_request");
    }

    #[tokio::test]
    async fn categories_stats_and_search() {
        let app = app();
        let (_, cats) = send(&app, get("/api/categories", None)).await;
        assert_eq!(cats, json!(["documents", "images", "software"]));

        let (_, stats) = send(&app, get("/api/stats", None)).await;
        assert_eq!(stats, json!({"files": 3, "downloads": 0, "categories": 3}));

        let (_, found) = send(&app, get("/api/files?q=installer", None)).await;
        assert_eq!(found.as_array().unwrap().len(), 1);

        let (_, found) = send(&app, get("/api/files?category=images", None)).await;
        assert_eq!(found[0]["category"], "images");
    }

    #[tokio::test]
    async fn init_endpoint_is_idempotent() {
        let app = app();
        let (status, body) = send(&app, get("/api/init", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["filesSeeded"], 0);

        let (_, files) = send(&app, get("/api/files", None)).await;
        assert_eq!(files.as_array().unwrap().len(), 3);
    }

    #[test]
    fn explicit_data_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("data");
        let resolved = resolve_data_dir(Some(&dir)).unwrap();
        assert_eq!(resolved, dir);
        assert!(dir.is_dir());
    }

    #[test]
    fn invalid_storage_env_falls_back_to_redb() {
        assert_eq!(parse_storage_env("memroy"), StorageKind::Redb);
        assert_eq!(parse_storage_env("memory"), StorageKind::Memory);
    }

    #[test]
    fn storage_kind_parses() {
        assert_eq!("redb".parse::<StorageKind>(), Ok(StorageKind::Redb));
        assert_eq!("Memory".parse::<StorageKind>(), Ok(StorageKind::Memory));
        assert!("postgres".parse::<StorageKind>().is_err());
    }
}
