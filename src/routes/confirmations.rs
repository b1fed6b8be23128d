use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json as AxumJson},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::db::models::Offer;
use crate::lifecycle::{self, LifecycleError, OfferAction, OfferStatus, RequestKind};
use crate::routes::lifecycle_error_response;
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateOfferPayload {
    pub request_id: String,
    pub message: Option<String>,
    pub method: Option<String>,
    pub proposed_time: Option<String>, // RFC3339
}

#[derive(Deserialize)]
pub struct RatingPayload {
    pub stars: i32,
    pub comment: Option<String>,
}

fn display_name(first: &str, last: &str) -> String {
    let name = format!("{} {}", first, last);
    let trimmed = name.trim().to_string();
    if trimmed.is_empty() {
        "A user".to_string()
    } else {
        trimmed
    }
}

/// Notification failures never fail the operation that triggered them.
async fn notify(
    state: &AppState,
    recipient_id: &str,
    notification_type: &str,
    message: String,
    reference_id: &str,
) {
    let id = Uuid::new_v4().to_string();
    if let Err(e) = crate::db::insert_notification(
        &state.db,
        &id,
        recipient_id,
        notification_type,
        &message,
        &Some(reference_id.to_string()),
    )
    .await
    {
        tracing::error!("Notification insert failed: {}", e);
    }
}

async fn audit(state: &AppState, user_id: &str, action: &str, offer_id: &str) {
    let audit_id = Uuid::new_v4().to_string();
    if let Err(e) = crate::db::log_audit(
        &state.db,
        &audit_id,
        user_id,
        action,
        "offers",
        &Some(offer_id.to_string()),
        &None,
    )
    .await
    {
        tracing::error!("Audit insert failed: {}", e);
    }
}

async fn create_offer(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
    payload: CreateOfferPayload,
) -> axum::response::Response {
    let method = payload
        .method
        .as_ref()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());
    if method.is_none() {
        return lifecycle_error_response(LifecycleError::Validation(
            "a contact or donation method is required".to_string(),
        ));
    }

    let proposed_time: Option<DateTime<Utc>> = match payload.proposed_time.as_deref() {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(_) => {
                return lifecycle_error_response(LifecycleError::Validation(
                    "proposed_time must be an RFC3339 timestamp".to_string(),
                ))
            }
        },
        None => None,
    };

    let req = match crate::db::get_request(&state.db, &payload.request_id).await {
        Ok(Some(r)) if r.kind == kind => r,
        Ok(_) => return (StatusCode::NOT_FOUND, "Request not found").into_response(),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    };

    let existing = match crate::db::find_open_offer(&state.db, &req.id, &user.id).await {
        Ok(existing) => existing,
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    };

    let now = Utc::now();
    if let Err(e) = lifecycle::check_new_offer(
        &user.id,
        &req.owner_id,
        now,
        req.deadline,
        req.is_active,
        existing.as_ref().map(|o| o.status),
    ) {
        // Surface the already-open offer so the client can show its status
        // instead of the submission form.
        if e == LifecycleError::DuplicateOffer {
            if let Some(open) = existing {
                return (
                    StatusCode::CONFLICT,
                    AxumJson(serde_json::json!({
                        "error": e.to_string(),
                        "existing": { "id": open.id, "status": open.status },
                    })),
                )
                    .into_response();
            }
        }
        return lifecycle_error_response(e);
    }

    let offer = Offer {
        id: Uuid::new_v4().to_string(),
        request_id: req.id.clone(),
        kind,
        donor_id: user.id.clone(),
        recipient_id: req.owner_id.clone(),
        message: payload
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty()),
        method,
        proposed_time,
        status: OfferStatus::Pending,
        stars: None,
        rating_comment: None,
        created_at: now,
        updated_at: now,
    };

    match crate::db::insert_offer(&state.db, &offer).await {
        // The partial unique index lost the race for us
        Ok(false) => return lifecycle_error_response(LifecycleError::DuplicateOffer),
        Ok(true) => {}
        Err(e) => {
            tracing::error!("DB Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    }

    let donor_name = display_name(&user.first_name, &user.last_name);
    notify(
        &state,
        &req.owner_id,
        "offer_received",
        format!("{} offered to help with your request", donor_name),
        &offer.id,
    )
    .await;
    audit(&state, &user.id, "create", &offer.id).await;

    (
        StatusCode::CREATED,
        AxumJson(serde_json::json!({ "status": "created", "id": offer.id })),
    )
        .into_response()
}

/// Shared owner-driven transition: accept, reject, fulfill. Rate carries a
/// payload and goes through `rate_offer` below.
async fn transition(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
    id: String,
    action: OfferAction,
) -> axum::response::Response {
    let offer = match crate::db::get_offer(&state.db, &id).await {
        Ok(Some(o)) if o.kind == kind => o,
        Ok(_) => return (StatusCode::NOT_FOUND, "Offer not found").into_response(),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    };

    if let Err(e) = lifecycle::authorize(action, &user.id, &offer.donor_id, &offer.recipient_id) {
        return lifecycle_error_response(e);
    }

    let next = match lifecycle::next_status(offer.status, action) {
        Ok(next) => next,
        Err(e) => return lifecycle_error_response(e),
    };

    match crate::db::transition_offer(&state.db, &offer.id, offer.status, next).await {
        Ok(true) => {}
        // Lost a concurrent race; the stored status is no longer what we
        // read, so this is the same state conflict as a stale request.
        Ok(false) => {
            return lifecycle_error_response(LifecycleError::InvalidTransition {
                from: offer.status,
                action,
            })
        }
        Err(e) => {
            tracing::error!("DB Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    }

    let owner_name = display_name(&user.first_name, &user.last_name);
    let (ntype, message) = match next {
        OfferStatus::Accepted => (
            "offer_accepted",
            format!(
                "{} accepted your offer. Contact details are now shared.",
                owner_name
            ),
        ),
        OfferStatus::Rejected => (
            "offer_rejected",
            format!("{} declined your offer", owner_name),
        ),
        OfferStatus::Fulfilled => (
            "offer_fulfilled",
            format!("{} marked your donation as fulfilled", owner_name),
        ),
        _ => ("offer_updated", "Your offer was updated".to_string()),
    };
    notify(&state, &offer.donor_id, ntype, message, &offer.id).await;
    audit(&state, &user.id, action.as_str(), &offer.id).await;

    AxumJson(serde_json::json!({ "status": next, "id": offer.id })).into_response()
}

async fn rate_offer(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
    id: String,
    payload: RatingPayload,
) -> axum::response::Response {
    if !(1..=5).contains(&payload.stars) {
        return lifecycle_error_response(LifecycleError::Validation(
            "stars must be between 1 and 5".to_string(),
        ));
    }

    let offer = match crate::db::get_offer(&state.db, &id).await {
        Ok(Some(o)) if o.kind == kind => o,
        Ok(_) => return (StatusCode::NOT_FOUND, "Offer not found").into_response(),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    };

    if let Err(e) = lifecycle::authorize(
        OfferAction::Rate,
        &user.id,
        &offer.donor_id,
        &offer.recipient_id,
    ) {
        return lifecycle_error_response(e);
    }
    if let Err(e) = lifecycle::next_status(offer.status, OfferAction::Rate) {
        return lifecycle_error_response(e);
    }

    let comment = payload
        .comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    match crate::db::rate_offer(&state.db, &offer.id, payload.stars, &comment).await {
        Ok(true) => {}
        Ok(false) => {
            return lifecycle_error_response(LifecycleError::InvalidTransition {
                from: offer.status,
                action: OfferAction::Rate,
            })
        }
        Err(e) => {
            tracing::error!("DB Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    }

    notify(
        &state,
        &offer.donor_id,
        "offer_rated",
        format!("You received a {}-star rating for your donation", payload.stars),
        &offer.id,
    )
    .await;
    audit(&state, &user.id, "rate", &offer.id).await;

    AxumJson(serde_json::json!({ "status": OfferStatus::Rated, "id": offer.id })).into_response()
}

async fn cancel_offer(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
    id: String,
) -> axum::response::Response {
    let offer = match crate::db::get_offer(&state.db, &id).await {
        Ok(Some(o)) if o.kind == kind => o,
        Ok(_) => return (StatusCode::NOT_FOUND, "Offer not found").into_response(),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    };

    if let Err(e) = lifecycle::authorize(
        OfferAction::Cancel,
        &user.id,
        &offer.donor_id,
        &offer.recipient_id,
    ) {
        return lifecycle_error_response(e);
    }
    if offer.status != OfferStatus::Pending {
        return lifecycle_error_response(LifecycleError::InvalidTransition {
            from: offer.status,
            action: OfferAction::Cancel,
        });
    }

    match crate::db::delete_pending_offer(&state.db, &offer.id, &user.id).await {
        Ok(true) => {
            audit(&state, &user.id, "cancel", &offer.id).await;
            (StatusCode::OK, "Cancelled").into_response()
        }
        Ok(false) => lifecycle_error_response(LifecycleError::InvalidTransition {
            from: offer.status,
            action: OfferAction::Cancel,
        }),
        Err(e) => {
            tracing::error!("DB Error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}

/// Owner's view of a request's offers, donor names resolved through the
/// user directory.
async fn offers_for_request(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
    request_id: String,
) -> axum::response::Response {
    let req = match crate::db::get_request(&state.db, &request_id).await {
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

    let offers = match crate::db::list_offers_for_request(&state.db, &req.id).await {
        Ok(offers) => offers,
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response();
        }
    };

    let mut out = Vec::with_capacity(offers.len());
    for offer in offers {
        let donor = match crate::db::get_user(&state.db, &offer.donor_id).await {
            Ok(u) => u.map(crate::db::models::PublicUser::from),
            Err(e) => {
                tracing::error!("User lookup failed: {}", e);
                None
            }
        };
        out.push(serde_json::json!({ "offer": offer, "donor": donor }));
    }
    AxumJson(serde_json::json!({ "offers": out })).into_response()
}

/// Offers received against the caller's own requests.
async fn offers_received(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
) -> axum::response::Response {
    match crate::db::list_offers_received(&state.db, &user.id, kind).await {
        Ok(offers) => AxumJson(serde_json::json!({ "offers": offers })).into_response(),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}

/// Offers the caller authored as a donor.
async fn offers_sent(
    state: AppState,
    user: AuthenticatedUser,
    kind: RequestKind,
) -> axum::response::Response {
    match crate::db::list_offers_sent(&state.db, &user.id, kind).await {
        Ok(offers) => AxumJson(serde_json::json!({ "offers": offers })).into_response(),
        Err(e) => {
            tracing::error!("DB Query Error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database Error").into_response()
        }
    }
}

// Blood family (/api/donation-confirmations)

pub async fn create_blood_offer(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOfferPayload>,
) -> impl IntoResponse {
    create_offer(state, user, RequestKind::Blood, payload).await
}

pub async fn accept_blood_offer(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    transition(state, user, RequestKind::Blood, id, OfferAction::Accept).await
}

pub async fn reject_blood_offer(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    transition(state, user, RequestKind::Blood, id, OfferAction::Reject).await
}

pub async fn fulfill_blood_offer(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    transition(state, user, RequestKind::Blood, id, OfferAction::Fulfill).await
}

pub async fn rate_blood_offer(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<RatingPayload>,
) -> impl IntoResponse {
    rate_offer(state, user, RequestKind::Blood, id, payload).await
}

pub async fn cancel_blood_offer(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    cancel_offer(state, user, RequestKind::Blood, id).await
}

pub async fn blood_offers_for_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    offers_for_request(state, user, RequestKind::Blood, id).await
}

pub async fn my_blood_offers(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    offers_received(state, user, RequestKind::Blood).await
}

pub async fn sent_blood_offers(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    offers_sent(state, user, RequestKind::Blood).await
}

// General family (/api/donation-request-confirmations)

pub async fn create_general_offer(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOfferPayload>,
) -> impl IntoResponse {
    create_offer(state, user, RequestKind::General, payload).await
}

pub async fn accept_general_offer(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    transition(state, user, RequestKind::General, id, OfferAction::Accept).await
}

pub async fn reject_general_offer(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    transition(state, user, RequestKind::General, id, OfferAction::Reject).await
}

pub async fn fulfill_general_offer(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    transition(state, user, RequestKind::General, id, OfferAction::Fulfill).await
}

pub async fn rate_general_offer(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<RatingPayload>,
) -> impl IntoResponse {
    rate_offer(state, user, RequestKind::General, id, payload).await
}

pub async fn cancel_general_offer(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    cancel_offer(state, user, RequestKind::General, id).await
}

pub async fn general_offers_for_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    offers_for_request(state, user, RequestKind::General, id).await
}

pub async fn my_general_offers(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    offers_received(state, user, RequestKind::General).await
}

pub async fn sent_general_offers(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> impl IntoResponse {
    offers_sent(state, user, RequestKind::General).await
}
