pub mod config;

use std::path::Path;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use quickchat_api::auth::{self, decode_token};
use quickchat_api::error::ApiError;
use quickchat_api::extract::ApiQuery;
use quickchat_api::middleware::require_auth;
use quickchat_api::state::AppState;
use quickchat_api::{chat_requests, messages, users};
use quickchat_gateway::connection;

/// Assemble the full HTTP surface: public auth routes, JWT-protected REST
/// routes, the realtime gateway and the static media directory.
pub fn app(state: AppState, media_dir: &Path, media_url: &str) -> Router {
    let send_limit = send_body_limit(state.max_image_bytes);

    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/chat-requests", get(chat_requests::list_requests))
        .route("/chat-requests/send", post(chat_requests::send_request))
        .route("/chat-requests/accept/{request_id}", put(chat_requests::accept_request))
        .route("/chat-requests/reject/{request_id}", put(chat_requests::reject_request))
        .route("/messages/users", get(messages::sidebar_users))
        .route("/messages/sidebar", get(messages::sidebar))
        .route("/messages/seen/{message_id}", put(messages::mark_seen))
        .route(
            "/messages/send/{peer_id}",
            post(messages::send_message).layer(DefaultBodyLimit::max(send_limit)),
        )
        .route("/messages/{peer_id}", get(messages::get_conversation))
        .route("/users/search", get(users::search))
        .route("/connections", get(users::connections))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service(media_url, ServeDir::new(media_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Base64 inflates by 4/3; the slack covers the JSON envelope and a data URL header.
fn send_body_limit(max_image_bytes: usize) -> usize {
    max_image_bytes / 3 * 4 + 4 + 64 * 1024
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token rides in the query.
async fn ws_upgrade(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(claims) = decode_token(&state.jwt_secret, &query.token) else {
        return ApiError::Unauthorized.into_response();
    };

    let tracker = state.presence.clone();
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, tracker, claims.sub, claims.username)
    })
}
