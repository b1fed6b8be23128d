use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json as AxumJson, Response},
};
use chrono::Utc;

use crate::auth::AuthenticatedUser;
use crate::AppState;

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        let escaped = s.replace('"', "\"\"");
        format!("\"{}\"", escaped)
    } else {
        s.to_string()
    }
}

/// Moderation listing: both variants, inactive included.
pub async fn list_all_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    if !user.is_admin {
        return (StatusCode::FORBIDDEN, "Admin only").into_response();
    }

    match crate::db::list_all_requests(&state.db).await {
        Ok(list) => {
            let now = Utc::now();
            let out: Vec<_> = list
                .iter()
                .map(|r| {
                    let open = r.is_active && crate::lifecycle::is_active(now, r.deadline);
                    serde_json::json!({ "request": r, "open_for_offers": open })
                })
                .collect();
            AxumJson(serde_json::json!({ "requests": out })).into_response()
        }
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}

#[derive(serde::Deserialize)]
pub struct AuditExportParams {
    pub since: Option<String>,
}

pub async fn export_audit_csv(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<AuditExportParams>,
) -> impl IntoResponse {
    if !user.is_admin {
        return (StatusCode::FORBIDDEN, "Admin only").into_response();
    }

    let since_dt = params
        .since
        .as_ref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    match crate::db::list_audit_logs(&state.db, since_dt).await {
        Ok(list) => {
            let mut w = String::new();
            w.push_str("id,user_id,action,table_name,record_id,details,created_at\n");
            for a in list {
                let record_id = a.record_id.unwrap_or_default();
                let details = a.details.unwrap_or_default();
                let created = a.created_at.to_rfc3339();
                w.push_str(&format!(
                    "{},{},{},{},{},{},{}\n",
                    csv_escape(&a.id),
                    csv_escape(&a.user_id),
                    csv_escape(&a.action),
                    csv_escape(&a.table_name),
                    csv_escape(&record_id),
                    csv_escape(&details),
                    csv_escape(&created),
                ));
            }

            let mut resp = Response::new(w.into());
            let headers = resp.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/csv; charset=utf-8"),
            );
            headers.insert(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment; filename=audit_logs.csv"),
            );
            resp
        }
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::csv_escape;

    #[test]
    fn escapes_commas_and_quotes() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
