use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};

use quickchat_types::api::{Claims, Envelope, SearchQuery, UserListResponse};

use crate::error::ApiError;
use crate::extract::ApiQuery;
use crate::state::{AppState, run_blocking};

/// People search by display name, each result tagged with the caller's relation to it.
pub async fn search(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let projection = state.projection.clone();
    let users = run_blocking(move || projection.findable_users(claims.sub, &query.q)).await?;
    Ok(Json(Envelope::ok(UserListResponse { users })))
}

pub async fn connections(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let projection = state.projection.clone();
    let users = run_blocking(move || projection.connected_peers(claims.sub)).await?;
    Ok(Json(Envelope::ok(UserListResponse { users })))
}
