use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json as AxumJson},
};

use crate::auth::AuthenticatedUser;
use crate::AppState;

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    match crate::db::list_notifications(&state.db, &user.id).await {
        Ok(list) => {
            let unread = list.iter().filter(|n| !n.is_read).count();
            AxumJson(serde_json::json!({ "notifications": list, "unread": unread }))
                .into_response()
        }
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}

pub async fn mark_read(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    match crate::db::mark_notification_read(&state.db, &user.id, &id).await {
        Ok(true) => (StatusCode::OK, "OK").into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Not found").into_response(),
        Err(e) => {
            tracing::error!("DB Error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    match crate::db::mark_all_notifications_read(&state.db, &user.id).await {
        Ok(count) => AxumJson(serde_json::json!({ "marked": count })).into_response(),
        Err(e) => {
            tracing::error!("DB Error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}
