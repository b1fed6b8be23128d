use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json as AxumJson},
};

use crate::auth::AuthenticatedUser;
use crate::db::models::PublicUser;
use crate::AppState;

/// Directory lookup: only the public subset ever leaves the server.
pub async fn get_public_user(
    Path(id): Path<String>,
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> impl IntoResponse {
    match crate::db::get_user(&state.db, &id).await {
        Ok(Some(u)) => AxumJson(PublicUser::from(u)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "User not found").into_response(),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}
