use crate::lifecycle::{OfferStatus, RequestKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub provider: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The public subset other users are allowed to see.
#[derive(Serialize, Debug, Clone)]
pub struct PublicUser {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        PublicUser {
            id: u.id,
            first_name: u.first_name,
            last_name: u.last_name,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContactMethod {
    pub method: String,
    pub number: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DonationRequest {
    pub id: String,
    pub owner_id: String,
    pub kind: RequestKind,
    pub blood_type: Option<String>,
    pub category: Option<String>,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub place: Option<String>,
    pub is_urgent: bool,
    pub deadline: DateTime<Utc>,
    /// Ordered; disclosed per the visibility rule, never stored redacted.
    pub contact_methods: Vec<ContactMethod>,
    pub is_active: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Offer {
    pub id: String,
    pub request_id: String,
    pub kind: RequestKind,
    pub donor_id: String,
    /// Request owner at creation time, denormalized for inbox lookups.
    pub recipient_id: String,
    pub message: Option<String>,
    pub method: Option<String>,
    pub proposed_time: Option<DateTime<Utc>>,
    pub status: OfferStatus,
    pub stars: Option<i32>,
    pub rating_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub notification_type: String,
    pub message: String,
    pub reference_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuditLog {
    pub id: String,
    pub user_id: String,
    pub action: String,
    pub table_name: String,
    pub record_id: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}
