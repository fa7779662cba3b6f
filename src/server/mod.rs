// src/server/mod.rs
//
// HTTP server assembly: shared state, routing, optional HTTP Basic auth
// and graceful shutdown. The runtime pieces (manager, scanner, registry,
// stores, bus) are constructed by the entry point and injected here; no
// process-wide singletons.

pub mod protocol;
mod rest;
mod ws;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine as _;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};

use crate::channel::manager::ChannelManager;
use crate::decoders::DecoderRegistry;
use crate::events::EventBus;
use crate::ports::PortScanner;
use crate::stores::{MacroStore, ProfileStore};

/// Serial monitoring server: bridges serial devices to WebSocket clients.
#[derive(Parser, Debug, Clone)]
#[command(name = "linetap")]
#[command(about = "Multi-channel serial-port monitoring server")]
#[command(version)]
pub struct Args {
    /// HTTP/WebSocket server port
    #[arg(short, long, default_value = "3000", env = "PORT")]
    pub port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Directory for the macro and profile stores
    #[arg(long, default_value = "data", env = "DATA_DIR")]
    pub data_dir: PathBuf,

    /// Mirror logs into a file under this directory
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Serial port hot-plug poll interval in milliseconds
    #[arg(long, default_value = "2000")]
    pub poll_interval_ms: u64,

    /// Comma-separated decoder names to enable (default: all builtin)
    #[arg(long, value_delimiter = ',')]
    pub decoders: Option<Vec<String>>,

    /// Require HTTP Basic authentication
    #[arg(long, env = "AUTH_ENABLED")]
    pub auth_enabled: bool,

    /// Basic auth username
    #[arg(long, env = "AUTH_USER")]
    pub auth_user: Option<String>,

    /// Basic auth password
    #[arg(long, env = "AUTH_PASS")]
    pub auth_pass: Option<String>,
}

/// Shared application state, one per process.
pub struct AppState {
    pub manager: Arc<ChannelManager>,
    pub scanner: Arc<PortScanner>,
    pub decoders: Arc<DecoderRegistry>,
    pub macros: Arc<MacroStore>,
    pub profiles: Arc<ProfileStore>,
    pub bus: EventBus,
    pub auth: Option<(String, String)>,
    pub shutdown: Notify,
}

impl AppState {
    pub fn build(args: &Args) -> Result<Arc<Self>, String> {
        let bus = EventBus::new();
        let decoders = Arc::new(DecoderRegistry::new(args.decoders.as_deref()));
        let manager = Arc::new(ChannelManager::new(bus.clone(), Arc::clone(&decoders)));
        let scanner = Arc::new(PortScanner::new(bus.clone()));
        let macros = Arc::new(MacroStore::load(&args.data_dir).map_err(|e| e.to_string())?);
        let profiles = Arc::new(ProfileStore::load(&args.data_dir).map_err(|e| e.to_string())?);

        let auth = if args.auth_enabled {
            let user = args.auth_user.clone().unwrap_or_default();
            let pass = args.auth_pass.clone().unwrap_or_default();
            if user.is_empty() {
                return Err("AUTH_ENABLED requires AUTH_USER and AUTH_PASS".to_string());
            }
            Some((user, pass))
        } else {
            None
        };

        Ok(Arc::new(AppState {
            manager,
            scanner,
            decoders,
            macros,
            profiles,
            bus,
            auth,
            shutdown: Notify::new(),
        }))
    }

    /// Best-effort teardown: close every channel, stop port polling.
    pub async fn shutdown_all(&self) {
        self.scanner.stop().await;
        self.manager.shutdown_all().await;
    }
}

/// HTTP Basic check against the configured credentials. Skipped entirely
/// when auth is disabled.
async fn basic_auth(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let (expected_user, expected_pass) = match &state.auth {
        Some(credentials) => credentials,
        None => return next.run(request).await,
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| base64::engine::general_purpose::STANDARD.decode(encoded).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .map(|credentials| credentials == format!("{}:{}", expected_user, expected_pass))
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"linetap\"")],
            "Unauthorized",
        )
            .into_response()
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_socket(socket, state))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/ports", get(rest::get_ports))
        .route("/connect", post(rest::connect))
        .route("/disconnect", post(rest::disconnect))
        .route("/status", get(rest::status))
        .route("/clear", post(rest::clear))
        .route("/buffer", get(rest::get_buffer))
        .route("/send", post(rest::send))
        .route("/export", post(rest::export))
        .route("/plugins", get(rest::get_plugins))
        .route("/channels/remove", post(rest::remove_channel))
        .route("/macros", get(rest::list_macros).post(rest::create_macro))
        .route(
            "/macros/:id",
            get(rest::get_macro)
                .put(rest::update_macro)
                .delete(rest::delete_macro),
        )
        .route("/macros/:id/run", post(rest::run_macro))
        .route(
            "/profiles",
            get(rest::list_profiles).post(rest::create_profile),
        )
        .route(
            "/profiles/:id",
            get(rest::get_profile)
                .put(rest::update_profile)
                .delete(rest::delete_profile),
        )
        .route("/shutdown", post(rest::shutdown))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            basic_auth,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind, serve until shutdown is requested (POST /shutdown or Ctrl-C),
/// then release every channel and stop polling.
pub async fn run(args: Args) -> Result<(), String> {
    if let Some(log_dir) = &args.log_dir {
        crate::logging::init_file_logging(log_dir)?;
    }

    tlog!("[server] linetap v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::build(&args)?;
    state
        .scanner
        .start(Duration::from_millis(args.poll_interval_ms.max(100)));

    let app = build_router(Arc::clone(&state));
    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", addr, e))?;

    tlog!("[server] WebSocket endpoint: ws://{}/ws", addr);
    tlog!("[server] REST endpoint:      http://{}/", addr);

    let shutdown_state = Arc::clone(&state);
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_state.shutdown.notified() => {
                    tlog!("[server] Shutdown requested via API");
                }
                _ = tokio::signal::ctrl_c() => {
                    tlog!("[server] Interrupt received");
                }
            }
        })
        .await;

    // Best-effort cleanup; shutdown never propagates errors upward
    state.shutdown_all().await;
    crate::logging::stop_file_logging();

    serve_result.map_err(|e| format!("Server error: {}", e))?;
    tlog!("[server] Clean shutdown");
    Ok(())
}
