use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::error::ApiError;
use parley_api::mailer::LogMailer;
use parley_api::messages;
use parley_api::middleware::require_auth;
use parley_api::rooms;
use parley_api::sessions::Sessions;
use parley_db::Database;
use parley_gateway::broker::RoomBroker;
use parley_gateway::connection::{self, ConnectedUser};

#[derive(Clone)]
struct ServerState {
    app: AppState,
    broker: RoomBroker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let public_url =
        std::env::var("PARLEY_PUBLIC_URL").unwrap_or_else(|_| format!("http://localhost:{port}"));

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let broker = RoomBroker::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        sessions: Sessions::new(jwt_secret),
        mailer: Arc::new(LogMailer::new(public_url)),
    });

    let state = ServerState {
        app: app_state.clone(),
        broker: broker.clone(),
    };

    // Routes
    let public_routes = Router::new()
        .route("/session/signup", post(auth::signup))
        .route("/session/login", post(auth::login))
        .route("/session/refresh", post(auth::refresh))
        .route("/session/verify-email", get(auth::verify_email))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/messages", get(messages::get_messages))
        .route("/rooms", get(rooms::list_rooms))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(broker))
        .await?;

    Ok(())
}

/// Resolves on Ctrl-C. Dropping the broker's connections first lets every
/// gateway loop wind down so graceful shutdown is not left waiting on open
/// WebSockets.
async fn shutdown_signal(broker: RoomBroker) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutting down");
    broker.shutdown();
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

/// Runs the same access-token chain as the HTTP middleware before the
/// upgrade: valid token, existing user, verified email. The connection
/// itself then never re-checks identity.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let claims = state.app.sessions.verify_access(&query.token)?;
    let user = state
        .app
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::Unauthenticated("User not found"))?;
    if !user.verified {
        return Err(ApiError::EmailUnverified);
    }

    let connected = ConnectedUser {
        user_id: claims.sub,
        username: user.username,
    };
    let db = state.app.db.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.broker, db, connected)
    }))
}
