use axum::{
    body::Body,
    extract::State,
    http::{header, header::HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{from_fn, Next},
    response::{Html, IntoResponse},
    routing::{delete, get, patch, post},
    Router,
};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use donor_connect::{auth, db, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if it exists
    dotenvy::dotenv().ok();

    // Ensure critical environment variables are set
    env::var("JWT_SECRET").expect("JWT_SECRET must be set");

    // Initialize Tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "donor_connect=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Donor Connect application...");

    let index_template = fs::read_to_string("static/index.html")?;

    // Database Setup
    tracing::info!("Initializing database connection pool...");
    let db_pool = db::init_pool().await?;
    tracing::info!("Database connection pool initialized successfully");

    let state = AppState {
        db: db_pool,
        index_template,
    };

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(
                env::var("RATE_LIMIT_PER_SECOND")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1200),
            )
            .burst_size(
                env::var("RATE_LIMIT_BURST")
                    .ok()
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(2400),
            )
            .finish()
            .expect("governor config"),
    );

    // CORS configuration (no permissive mode)
    let cors = {
        let env_mode = env::var("RUST_ENV").unwrap_or_else(|_| "development".to_string());
        let origins = env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|v| {
                v.split(',')
                    .filter_map(|s| {
                        let trimmed = s.trim();
                        if trimmed.is_empty() {
                            return None;
                        }
                        match trimmed.parse::<HeaderValue>() {
                            Ok(value) => Some(value),
                            Err(_) => {
                                tracing::warn!("Ignoring invalid ALLOWED_ORIGINS entry: {}", trimmed);
                                None
                            }
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let origins = if origins.is_empty() {
            if env_mode == "production" {
                panic!("ALLOWED_ORIGINS must contain at least one valid origin in production")
            }
            vec![
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:3000"),
            ]
        } else {
            origins
        };

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::PATCH,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
            .allow_credentials(true)
    };

    // Router Setup
    let app = Router::new()
        .route("/", get(serve_index))
        .route("/index.html", get(serve_index))
        .route("/health", get(health_check))
        // Blood donation requests
        .route(
            "/api/donations",
            get(routes::requests::list_blood_requests).post(routes::requests::create_blood_request),
        )
        .route("/api/donations/mine", get(routes::requests::my_blood_requests))
        .route(
            "/api/donations/{id}",
            get(routes::requests::get_blood_request)
                .put(routes::requests::update_blood_request)
                .delete(routes::requests::delete_blood_request),
        )
        .route(
            "/api/donations/{id}/toggle-active",
            patch(routes::requests::toggle_blood_request),
        )
        // General donation requests
        .route(
            "/api/donation-requests",
            get(routes::requests::list_general_requests)
                .post(routes::requests::create_general_request),
        )
        .route(
            "/api/donation-requests/mine",
            get(routes::requests::my_general_requests),
        )
        .route(
            "/api/donation-requests/{id}",
            get(routes::requests::get_general_request)
                .put(routes::requests::update_general_request)
                .delete(routes::requests::delete_general_request),
        )
        .route(
            "/api/donation-requests/{id}/toggle-active",
            patch(routes::requests::toggle_general_request),
        )
        // Blood offer lifecycle
        .route(
            "/api/donation-confirmations",
            post(routes::confirmations::create_blood_offer),
        )
        .route(
            "/api/donation-confirmations/request/{id}",
            get(routes::confirmations::blood_offers_for_request),
        )
        .route(
            "/api/donation-confirmations/mine",
            get(routes::confirmations::my_blood_offers),
        )
        .route(
            "/api/donation-confirmations/sent",
            get(routes::confirmations::sent_blood_offers),
        )
        .route(
            "/api/donation-confirmations/{id}/accept",
            patch(routes::confirmations::accept_blood_offer),
        )
        .route(
            "/api/donation-confirmations/{id}/reject",
            patch(routes::confirmations::reject_blood_offer),
        )
        .route(
            "/api/donation-confirmations/{id}/fulfill",
            patch(routes::confirmations::fulfill_blood_offer),
        )
        .route(
            "/api/donation-confirmations/{id}/rate",
            patch(routes::confirmations::rate_blood_offer),
        )
        .route(
            "/api/donation-confirmations/{id}",
            delete(routes::confirmations::cancel_blood_offer),
        )
        // General offer lifecycle
        .route(
            "/api/donation-request-confirmations",
            post(routes::confirmations::create_general_offer),
        )
        .route(
            "/api/donation-request-confirmations/request/{id}",
            get(routes::confirmations::general_offers_for_request),
        )
        .route(
            "/api/donation-request-confirmations/mine",
            get(routes::confirmations::my_general_offers),
        )
        .route(
            "/api/donation-request-confirmations/sent",
            get(routes::confirmations::sent_general_offers),
        )
        .route(
            "/api/donation-request-confirmations/{id}/accept",
            patch(routes::confirmations::accept_general_offer),
        )
        .route(
            "/api/donation-request-confirmations/{id}/reject",
            patch(routes::confirmations::reject_general_offer),
        )
        .route(
            "/api/donation-request-confirmations/{id}/fulfill",
            patch(routes::confirmations::fulfill_general_offer),
        )
        .route(
            "/api/donation-request-confirmations/{id}/rate",
            patch(routes::confirmations::rate_general_offer),
        )
        .route(
            "/api/donation-request-confirmations/{id}",
            delete(routes::confirmations::cancel_general_offer),
        )
        // Notifications
        .route(
            "/api/notifications",
            get(routes::notifications::list_notifications),
        )
        .route(
            "/api/notifications/read-all",
            post(routes::notifications::mark_all_read),
        )
        .route(
            "/api/notifications/{id}/read",
            post(routes::notifications::mark_read),
        )
        // User directory
        .route("/api/users/{id}", get(routes::users::get_public_user))
        .route("/api/me", get(auth::me).put(auth::update_me))
        // Moderation
        .route("/api/admin/requests", get(routes::admin::list_all_requests))
        .route("/api/admin/audit/export", get(routes::admin::export_audit_csv))
        // Auth Routes
        .route("/auth/login/{provider}", get(auth::login))
        .route("/auth/callback/{provider}", get(auth::callback))
        .route("/auth/logout", post(auth::logout))
        // Dev only login
        .route("/auth/dev/login", post(auth::dev_login))
        .nest_service("/assets", ServeDir::new("static/assets"))
        .fallback(get(spa_fallback))
        .layer(from_fn(require_auth))
        .layer(cors)
        .layer(GovernorLayer {
            config: governor_config,
        })
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

async fn health_check() -> &'static str {
    "OK"
}

async fn require_auth(req: Request<Body>, next: Next) -> impl IntoResponse {
    // Guard only API endpoints here; non-API routes are SPA/document requests.
    let path = req.uri().path();
    if req.method() == axum::http::Method::OPTIONS || !path.starts_with("/api/") {
        return next.run(req).await;
    }

    let headers: &HeaderMap = req.headers();
    if auth::token_is_valid(headers) {
        return next.run(req).await;
    }

    // Not authenticated: API routes get 401.
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

async fn serve_index(State(state): State<AppState>) -> impl IntoResponse {
    Html(state.index_template.clone())
}

async fn spa_fallback(State(state): State<AppState>, req: Request<Body>) -> impl IntoResponse {
    let path = req.uri().path();
    if path.starts_with("/api/") {
        return StatusCode::NOT_FOUND.into_response();
    }
    serve_index(State(state)).await.into_response()
}
