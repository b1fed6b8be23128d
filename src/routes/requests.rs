use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json as AxumJson},
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::db::models::{ContactMethod, DonationRequest};
use crate::lifecycle::{self, LifecycleError, RequestKind};
use crate::routes::lifecycle_error_response;
use crate::AppState;

const BLOOD_TYPES: [&str; 8] = ["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"];

fn normalize_blood_type(input: &Option<String>) -> Option<String> {
    input.as_ref().and_then(|value| {
        let normalized = value.trim().to_uppercase();
        if BLOOD_TYPES.contains(&normalized.as_str()) {
            Some(normalized)
        } else {
            None
        }
    })
}

fn valid_contact_number(number: &str) -> bool {
    // digits with optional leading +, spaces and dashes tolerated
    let re = Regex::new(r"^\+?[0-9][0-9 \-]{5,19}$").unwrap();
    re.is_match(number.trim())
}

#[derive(Deserialize)]
pub struct ContactMethodPayload {
    pub method: String,
    pub number: String,
}

#[derive(Deserialize)]
pub struct CreateRequestPayload {
    pub blood_type: Option<String>,
    pub category: Option<String>,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub place: Option<String>,
    pub is_urgent: Option<bool>,
    pub deadline: String, // RFC3339
    pub contact_methods: Vec<ContactMethodPayload>,
}

#[derive(Deserialize)]
pub struct UpdateRequestPayload {
    pub blood_type: Option<String>,
    pub category: Option<String>,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub place: Option<String>,
    pub is_urgent: Option<bool>,
    pub deadline: Option<String>,
    pub contact_methods: Option<Vec<ContactMethodPayload>>,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub blood_type: Option<String>,
    pub category: Option<String>,
    pub place: Option<String>,
    pub urgent: Option<bool>,
}

fn validate_contact_methods(
    payload: &[ContactMethodPayload],
) -> Result<Vec<ContactMethod>, LifecycleError> {
    let methods: Vec<ContactMethod> = payload
        .iter()
        .filter(|c| !c.number.trim().is_empty())
        .map(|c| ContactMethod {
            method: c.method.trim().to_lowercase(),
            number: c.number.trim().to_string(),
        })
        .collect();

    if methods.is_empty() {
        return Err(LifecycleError::Validation(
            "at least one contact method is required".to_string(),
        ));
    }
    for m in &methods {
        if !valid_contact_number(&m.number) {
            return Err(LifecycleError::Validation(format!(
                "invalid contact number for method {}",
                m.method
            )));
        }
    }
    Ok(methods)
}

fn parse_deadline(raw: &str) -> Result<DateTime<Utc>, LifecycleError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| LifecycleError::Validation("deadline must be an RFC3339 timestamp".to_string()))
}

/// Contact methods leave the server only for viewers the disclosure rule
/// admits; everyone else gets the row with the list emptied.
fn redact(mut req: DonationRequest, viewer_id: &str) -> DonationRequest {
    if req.owner_id != viewer_id {
        req.contact_methods = Vec::new();
    }
    req
}

fn request_json(req: &DonationRequest, now: DateTime<Utc>) -> serde_json::Value {
    let open = req.is_active && lifecycle::is_active(now, req.deadline);
    let mut value = serde_json::to_value(req).unwrap_or_default();
    if let Some(map) = value.as_object_mut() {
        map.insert("open_for_offers".to_string(), serde_json::json!(open));
    }
    value
}

async fn create_request(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
    payload: CreateRequestPayload,
) -> axum::response::Response {
    let contact_methods = match validate_contact_methods(&payload.contact_methods) {
        Ok(m) => m,
        Err(e) => return lifecycle_error_response(e),
    };
    let deadline = match parse_deadline(&payload.deadline) {
        Ok(d) => d,
        Err(e) => return lifecycle_error_response(e),
    };

    let blood_type = normalize_blood_type(&payload.blood_type);
    let category = payload
        .category
        .as_ref()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty());

    match kind {
        RequestKind::Blood => {
            if blood_type.is_none() {
                return lifecycle_error_response(LifecycleError::Validation(
                    "a recognized blood type is required".to_string(),
                ));
            }
        }
        RequestKind::General => {
            if category.is_none() {
                return lifecycle_error_response(LifecycleError::Validation(
                    "a category is required".to_string(),
                ));
            }
        }
    }

    let now = Utc::now();
    let req = DonationRequest {
        id: Uuid::new_v4().to_string(),
        owner_id: user.id.clone(),
        kind,
        blood_type: if kind == RequestKind::Blood { blood_type } else { None },
        category: if kind == RequestKind::General { category } else { None },
        amount: if kind == RequestKind::General { payload.amount } else { None },
        description: payload.description,
        place: payload.place,
        is_urgent: payload.is_urgent.unwrap_or(false),
        deadline,
        contact_methods,
        is_active: true,
        deleted: false,
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = crate::db::insert_request(&state.db, &req).await {
        tracing::error!("DB Error: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
    }

    let audit_id = Uuid::new_v4().to_string();
    let details = Some(format!("Created {} request", kind.as_str()));
    let _ = crate::db::log_audit(
        &state.db,
        &audit_id,
        &user.id,
        "create",
        "requests",
        &Some(req.id.clone()),
        &details,
    )
    .await;

    (
        StatusCode::CREATED,
        AxumJson(serde_json::json!({ "status": "created", "id": req.id })),
    )
        .into_response()
}

async fn list_requests(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
    params: ListParams,
) -> axum::response::Response {
    let mut list = match crate::db::list_requests(&state.db, kind, false).await {
        Ok(list) => list,
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    };

    if let Some(bt) = normalize_blood_type(&params.blood_type) {
        list.retain(|r| r.blood_type.as_deref() == Some(bt.as_str()));
    }
    if let Some(cat) = params.category.as_ref().map(|c| c.trim().to_lowercase()) {
        list.retain(|r| r.category.as_deref() == Some(cat.as_str()));
    }
    if let Some(place) = params.place.as_ref().map(|p| p.trim().to_lowercase()) {
        list.retain(|r| {
            r.place
                .as_deref()
                .map(|p| p.to_lowercase().contains(&place))
                .unwrap_or(false)
        });
    }
    if params.urgent == Some(true) {
        list.retain(|r| r.is_urgent);
    }

    let now = Utc::now();
    let out: Vec<_> = list
        .into_iter()
        .map(|r| request_json(&redact(r, &user.id), now))
        .collect();
    AxumJson(serde_json::json!({ "requests": out })).into_response()
}

async fn my_requests(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
) -> axum::response::Response {
    match crate::db::list_requests_by_owner(&state.db, kind, &user.id).await {
        Ok(list) => {
            let now = Utc::now();
            let out: Vec<_> = list.iter().map(|r| request_json(r, now)).collect();
            AxumJson(serde_json::json!({ "requests": out })).into_response()
        }
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}

async fn get_request(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
    id: String,
) -> axum::response::Response {
    let req = match crate::db::get_request(&state.db, &id).await {
        Ok(Some(r)) if r.kind == kind => r,
        Ok(_) => return (StatusCode::NOT_FOUND, "Request not found").into_response(),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    };

    // Disclosure is recomputed on every read from the viewer's own offers.
    let visible = if req.owner_id == user.id {
        true
    } else {
        match crate::db::list_offer_statuses(&state.db, &req.id, &user.id).await {
            Ok(statuses) => lifecycle::contact_visible(&user.id, &req.owner_id, statuses),
            Err(e) => {
                tracing::error!("DB Query Error: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
            }
        }
    };

    let owner = match crate::db::get_user(&state.db, &req.owner_id).await {
        Ok(u) => u.map(crate::db::models::PublicUser::from),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            None
        }
    };

    let now = Utc::now();
    let mut shown = req.clone();
    if !visible {
        shown.contact_methods = Vec::new();
    }
    AxumJson(serde_json::json!({
        "request": request_json(&shown, now),
        "contact_visible": visible,
        "owner": owner,
    }))
    .into_response()
}

async fn update_request(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
    id: String,
    payload: UpdateRequestPayload,
) -> axum::response::Response {
    let mut req = match crate::db::get_request(&state.db, &id).await {
        Ok(Some(r)) if r.kind == kind => r,
        Ok(_) => return (StatusCode::NOT_FOUND, "Request not found").into_response(),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    };

    if req.owner_id != user.id {
        return (StatusCode::FORBIDDEN, "Not the request owner").into_response();
    }

    if let Some(bt) = payload.blood_type.as_ref() {
        match normalize_blood_type(&Some(bt.clone())) {
            Some(normalized) if kind == RequestKind::Blood => req.blood_type = Some(normalized),
            _ => {
                return lifecycle_error_response(LifecycleError::Validation(
                    "a recognized blood type is required".to_string(),
                ))
            }
        }
    }
    if let Some(cat) = payload.category {
        if kind == RequestKind::General {
            req.category = Some(cat.trim().to_lowercase());
        }
    }
    if payload.amount.is_some() && kind == RequestKind::General {
        req.amount = payload.amount;
    }
    if payload.description.is_some() {
        req.description = payload.description;
    }
    if payload.place.is_some() {
        req.place = payload.place;
    }
    if let Some(urgent) = payload.is_urgent {
        req.is_urgent = urgent;
    }
    if let Some(raw) = payload.deadline.as_ref() {
        match parse_deadline(raw) {
            Ok(d) => req.deadline = d,
            Err(e) => return lifecycle_error_response(e),
        }
    }
    if let Some(contacts) = payload.contact_methods.as_ref() {
        match validate_contact_methods(contacts) {
            Ok(m) => req.contact_methods = m,
            Err(e) => return lifecycle_error_response(e),
        }
    }

    match crate::db::update_request(&state.db, &user.id, &req).await {
        Ok(true) => AxumJson(serde_json::json!({ "status": "updated", "id": id })).into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Not found").into_response(),
        Err(e) => {
            tracing::error!("Update request error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}

async fn delete_request(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
    id: String,
) -> axum::response::Response {
    match crate::db::get_request(&state.db, &id).await {
        Ok(Some(r)) if r.kind == kind => {}
        Ok(_) => return (StatusCode::NOT_FOUND, "Not found").into_response(),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    }

    match crate::db::soft_delete_request(&state.db, &user.id, &id).await {
        Ok(true) => {
            let audit_id = Uuid::new_v4().to_string();
            let _ = crate::db::log_audit(
                &state.db,
                &audit_id,
                &user.id,
                "delete",
                "requests",
                &Some(id),
                &None,
            )
            .await;
            (StatusCode::OK, "Deleted").into_response()
        }
        Ok(false) => (StatusCode::FORBIDDEN, "Not the request owner").into_response(),
        Err(e) => {
            tracing::error!("Delete request error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}

/// Owner or admin may pause/resume a request. Display-only priority flags
/// stay untouched; this only gates new offers.
async fn toggle_active(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
    id: String,
) -> axum::response::Response {
    let req = match crate::db::get_request(&state.db, &id).await {
        Ok(Some(r)) if r.kind == kind => r,
        Ok(_) => return (StatusCode::NOT_FOUND, "Request not found").into_response(),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    };

    if req.owner_id != user.id && !user.is_admin {
        return (StatusCode::FORBIDDEN, "Not the request owner").into_response();
    }

    let target = !req.is_active;
    match crate::db::set_request_active(&state.db, &id, target).await {
        Ok(true) => {
            let audit_id = Uuid::new_v4().to_string();
            let details = Some(format!("is_active set to {}", target));
            let _ = crate::db::log_audit(
                &state.db,
                &audit_id,
                &user.id,
                "toggle_active",
                "requests",
                &Some(id.clone()),
                &details,
            )
            .await;
            AxumJson(serde_json::json!({ "status": "updated", "id": id, "is_active": target }))
                .into_response()
        }
        Ok(false) => (StatusCode::NOT_FOUND, "Not found").into_response(),
        Err(e) => {
            tracing::error!("Toggle active error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}

// Blood-request family (/api/donations)

pub async fn create_blood_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateRequestPayload>,
) -> impl IntoResponse {
    create_request(state, user, RequestKind::Blood, payload).await
}

pub async fn list_blood_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    list_requests(state, user, RequestKind::Blood, params).await
}

pub async fn my_blood_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    my_requests(state, user, RequestKind::Blood).await
}

pub async fn get_blood_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    get_request(state, user, RequestKind::Blood, id).await
}

pub async fn update_blood_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateRequestPayload>,
) -> impl IntoResponse {
    update_request(state, user, RequestKind::Blood, id, payload).await
}

pub async fn delete_blood_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    delete_request(state, user, RequestKind::Blood, id).await
}

pub async fn toggle_blood_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    toggle_active(state, user, RequestKind::Blood, id).await
}

// General-request family (/api/donation-requests)

pub async fn create_general_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateRequestPayload>,
) -> impl IntoResponse {
    create_request(state, user, RequestKind::General, payload).await
}

pub async fn list_general_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    list_requests(state, user, RequestKind::General, params).await
}

pub async fn my_general_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    my_requests(state, user, RequestKind::General).await
}

pub async fn get_general_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    get_request(state, user, RequestKind::General, id).await
}

pub async fn update_general_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateRequestPayload>,
) -> impl IntoResponse {
    update_request(state, user, RequestKind::General, id, payload).await
}

pub async fn delete_general_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    delete_request(state, user, RequestKind::General, id).await
}

pub async fn toggle_general_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    toggle_active(state, user, RequestKind::General, id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blood_type_normalization() {
        assert_eq!(
            normalize_blood_type(&Some("o+".to_string())),
            Some("O+".to_string())
        );
        assert_eq!(
            normalize_blood_type(&Some(" ab- ".to_string())),
            Some("AB-".to_string())
        );
        assert_eq!(normalize_blood_type(&Some("C+".to_string())), None);
        assert_eq!(normalize_blood_type(&None), None);
    }

    #[test]
    fn contact_numbers() {
        assert!(valid_contact_number("+222 46 12 34 56"));
        assert!(valid_contact_number("46123456"));
        assert!(!valid_contact_number("call me"));
        assert!(!valid_contact_number("123"));
    }

    #[test]
    fn contact_methods_require_one_number() {
        let empty: Vec<ContactMethodPayload> = vec![];
        assert!(matches!(
            validate_contact_methods(&empty),
            Err(LifecycleError::Validation(_))
        ));

        let blank = vec![ContactMethodPayload {
            method: "phone".to_string(),
            number: "   ".to_string(),
        }];
        assert!(matches!(
            validate_contact_methods(&blank),
            Err(LifecycleError::Validation(_))
        ));

        let ok = vec![
            ContactMethodPayload {
                method: "Phone".to_string(),
                number: "46123456".to_string(),
            },
            ContactMethodPayload {
                method: "whatsapp".to_string(),
                number: "".to_string(),
            },
        ];
        let parsed = validate_contact_methods(&ok).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].method, "phone");
    }
}
