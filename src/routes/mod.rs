use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as AxumJson, Response},
};
use serde_json::json;

use crate::lifecycle::LifecycleError;

pub mod admin;
pub mod confirmations;
pub mod notifications;
pub mod requests;
pub mod users;

/// Maps the lifecycle taxonomy onto HTTP: authorization failures are 403,
/// state conflicts and closed/duplicate guards are 409, validation is 422.
pub(crate) fn lifecycle_error_response(err: LifecycleError) -> Response {
    let status = match &err {
        LifecycleError::OwnerOnly(_) | LifecycleError::DonorOnly | LifecycleError::SelfOffer => {
            StatusCode::FORBIDDEN
        }
        LifecycleError::InvalidTransition { .. }
        | LifecycleError::RequestClosed
        | LifecycleError::DuplicateOffer => StatusCode::CONFLICT,
        LifecycleError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, AxumJson(json!({ "error": err.to_string() }))).into_response()
}
