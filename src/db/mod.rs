use oracle::Row;
use r2d2::Pool;
use r2d2_oracle::OracleConnectionManager;
use std::env;

use crate::lifecycle::{OfferStatus, RequestKind};
use chrono::{DateTime, Utc};

pub mod models;

use models::{AuditLog, ContactMethod, DonationRequest, Notification, Offer, User};

pub type DbPool = Pool<OracleConnectionManager>;

pub async fn init_pool() -> anyhow::Result<DbPool> {
    let username = env::var("DB_USER").expect("DB_USER must be set");
    let password = env::var("DB_PASSWORD").expect("DB_PASSWORD must be set");
    let conn_str = env::var("DB_CONNECT_STRING").expect("DB_CONNECT_STRING must be set");

    let manager = OracleConnectionManager::new(&username, &password, &conn_str);
    let pool = Pool::builder()
        // Tolerate transient connectivity delays
        .max_size(10)
        .connection_timeout(std::time::Duration::from_secs(60))
        .build(manager)
        .map_err(|e| anyhow::anyhow!("Failed to create DB pool: {}", e))?;

    Ok(pool)
}

fn get_bool(row: &Row, col: &str) -> anyhow::Result<bool> {
    Ok(row.get::<&str, i32>(col)? != 0)
}

fn parse_contact_methods(raw: Option<String>) -> Vec<ContactMethod> {
    raw.as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

fn row_to_user(row: &Row) -> anyhow::Result<User> {
    Ok(User {
        id: row.get("ID")?,
        email: row.get("EMAIL")?,
        first_name: row.get::<&str, Option<String>>("FIRST_NAME")?.unwrap_or_default(),
        last_name: row.get::<&str, Option<String>>("LAST_NAME")?.unwrap_or_default(),
        provider: row.get::<&str, Option<String>>("PROVIDER")?.unwrap_or_default(),
        is_admin: get_bool(row, "IS_ADMIN")?,
        created_at: row.get("CREATED_AT")?,
        updated_at: row.get("UPDATED_AT")?,
    })
}

fn row_to_request(row: &Row) -> anyhow::Result<DonationRequest> {
    let kind_raw: String = row.get("KIND")?;
    let kind = RequestKind::parse(&kind_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown request kind in row: {}", kind_raw))?;
    Ok(DonationRequest {
        id: row.get("ID")?,
        owner_id: row.get("OWNER_ID")?,
        kind,
        blood_type: row.get("BLOOD_TYPE")?,
        category: row.get("CATEGORY")?,
        amount: row.get("AMOUNT")?,
        description: row.get("DESCRIPTION")?,
        place: row.get("PLACE")?,
        is_urgent: get_bool(row, "IS_URGENT")?,
        deadline: row.get("DEADLINE")?,
        contact_methods: parse_contact_methods(row.get("CONTACT_METHODS")?),
        is_active: get_bool(row, "IS_ACTIVE")?,
        deleted: get_bool(row, "DELETED")?,
        created_at: row.get("CREATED_AT")?,
        updated_at: row.get("UPDATED_AT")?,
    })
}

fn row_to_offer(row: &Row) -> anyhow::Result<Offer> {
    let kind_raw: String = row.get("KIND")?;
    let kind = RequestKind::parse(&kind_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown offer kind in row: {}", kind_raw))?;
    let status_raw: String = row.get("STATUS")?;
    let status = OfferStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown offer status in row: {}", status_raw))?;
    Ok(Offer {
        id: row.get("ID")?,
        request_id: row.get("REQUEST_ID")?,
        kind,
        donor_id: row.get("DONOR_ID")?,
        recipient_id: row.get("RECIPIENT_ID")?,
        message: row.get("MESSAGE")?,
        method: row.get("METHOD")?,
        proposed_time: row.get("PROPOSED_TIME")?,
        status,
        stars: row.get("STARS")?,
        rating_comment: row.get("RATING_COMMENT")?,
        created_at: row.get("CREATED_AT")?,
        updated_at: row.get("UPDATED_AT")?,
    })
}

fn row_to_notification(row: &Row) -> anyhow::Result<Notification> {
    Ok(Notification {
        id: row.get("ID")?,
        recipient_id: row.get("RECIPIENT_ID")?,
        notification_type: row.get("NOTIFICATION_TYPE")?,
        message: row.get("MESSAGE")?,
        reference_id: row.get("REFERENCE_ID")?,
        is_read: get_bool(row, "IS_READ")?,
        created_at: row.get("CREATED_AT")?,
    })
}

fn row_to_audit(row: &Row) -> anyhow::Result<AuditLog> {
    Ok(AuditLog {
        id: row.get("ID")?,
        user_id: row.get("USER_ID")?,
        action: row.get("ACTION")?,
        table_name: row.get("TABLE_NAME")?,
        record_id: row.get("RECORD_ID")?,
        details: row.get("DETAILS")?,
        created_at: row.get("CREATED_AT")?,
    })
}

// ── Users ────────────────────────────────────────────────────────────────────

pub async fn upsert_user(
    pool: &DbPool,
    id: &str,
    email: &Option<String>,
    first_name: &str,
    last_name: &str,
    provider: &str,
) -> anyhow::Result<()> {
    let conn = pool.get()?;
    let now = Utc::now();
    conn.execute(
        "MERGE INTO users u USING (SELECT :1 AS id FROM dual) src ON (u.id = src.id) \
         WHEN MATCHED THEN UPDATE SET u.email = :2, u.first_name = :3, u.last_name = :4, u.provider = :5, u.updated_at = :6 \
         WHEN NOT MATCHED THEN INSERT (id, email, first_name, last_name, provider, is_admin, created_at, updated_at) \
         VALUES (:7, :8, :9, :10, :11, 0, :12, :13)",
        &[
            &id, email, &first_name, &last_name, &provider, &now,
            &id, email, &first_name, &last_name, &provider, &now, &now,
        ],
    )?;
    conn.commit()?;
    Ok(())
}

pub async fn get_user(pool: &DbPool, id: &str) -> anyhow::Result<Option<User>> {
    let conn = pool.get()?;
    match conn.query_row("SELECT * FROM users WHERE id = :1", &[&id]) {
        Ok(row) => Ok(Some(row_to_user(&row)?)),
        Err(oracle::Error::NoDataFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ── Requests ─────────────────────────────────────────────────────────────────

pub async fn insert_request(pool: &DbPool, req: &DonationRequest) -> anyhow::Result<()> {
    let conn = pool.get()?;
    let contacts = serde_json::to_string(&req.contact_methods)?;
    conn.execute(
        "INSERT INTO requests (id, owner_id, kind, blood_type, category, amount, description, place, \
         is_urgent, deadline, contact_methods, is_active, deleted, created_at, updated_at) \
         VALUES (:1, :2, :3, :4, :5, :6, :7, :8, :9, :10, :11, :12, 0, :13, :14)",
        &[
            &req.id,
            &req.owner_id,
            &req.kind.as_str(),
            &req.blood_type,
            &req.category,
            &req.amount,
            &req.description,
            &req.place,
            &(req.is_urgent as i32),
            &req.deadline,
            &contacts,
            &(req.is_active as i32),
            &req.created_at,
            &req.updated_at,
        ],
    )?;
    conn.commit()?;
    Ok(())
}

pub async fn get_request(pool: &DbPool, id: &str) -> anyhow::Result<Option<DonationRequest>> {
    let conn = pool.get()?;
    match conn.query_row(
        "SELECT * FROM requests WHERE id = :1 AND deleted = 0",
        &[&id],
    ) {
        Ok(row) => Ok(Some(row_to_request(&row)?)),
        Err(oracle::Error::NoDataFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Public listing: one variant, not deleted, urgent first, newest first.
/// Inactive requests are included only when `include_inactive` is set
/// (owner/admin views).
pub async fn list_requests(
    pool: &DbPool,
    kind: RequestKind,
    include_inactive: bool,
) -> anyhow::Result<Vec<DonationRequest>> {
    let conn = pool.get()?;
    let sql = if include_inactive {
        "SELECT * FROM requests WHERE kind = :1 AND deleted = 0 \
         ORDER BY is_urgent DESC, created_at DESC"
    } else {
        "SELECT * FROM requests WHERE kind = :1 AND deleted = 0 AND is_active = 1 \
         ORDER BY is_urgent DESC, created_at DESC"
    };
    let rows = conn.query(sql, &[&kind.as_str()])?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row_to_request(&row?)?);
    }
    Ok(out)
}

pub async fn list_requests_by_owner(
    pool: &DbPool,
    kind: RequestKind,
    owner_id: &str,
) -> anyhow::Result<Vec<DonationRequest>> {
    let conn = pool.get()?;
    let rows = conn.query(
        "SELECT * FROM requests WHERE kind = :1 AND owner_id = :2 AND deleted = 0 \
         ORDER BY created_at DESC",
        &[&kind.as_str(), &owner_id],
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row_to_request(&row?)?);
    }
    Ok(out)
}

/// Moderation view: everything not deleted, both variants.
pub async fn list_all_requests(pool: &DbPool) -> anyhow::Result<Vec<DonationRequest>> {
    let conn = pool.get()?;
    let rows = conn.query(
        "SELECT * FROM requests WHERE deleted = 0 ORDER BY created_at DESC",
        &[],
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row_to_request(&row?)?);
    }
    Ok(out)
}

/// Full-row owner update. Returns false when the row is missing, deleted or
/// owned by someone else.
pub async fn update_request(
    pool: &DbPool,
    owner_id: &str,
    req: &DonationRequest,
) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let contacts = serde_json::to_string(&req.contact_methods)?;
    let now = Utc::now();
    let stmt = conn.execute(
        "UPDATE requests SET blood_type = :1, category = :2, amount = :3, description = :4, \
         place = :5, is_urgent = :6, deadline = :7, contact_methods = :8, updated_at = :9 \
         WHERE id = :10 AND owner_id = :11 AND deleted = 0",
        &[
            &req.blood_type,
            &req.category,
            &req.amount,
            &req.description,
            &req.place,
            &(req.is_urgent as i32),
            &req.deadline,
            &contacts,
            &now,
            &req.id,
            &owner_id,
        ],
    )?;
    conn.commit()?;
    Ok(stmt.row_count()? > 0)
}

pub async fn soft_delete_request(pool: &DbPool, owner_id: &str, id: &str) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let now = Utc::now();
    let stmt = conn.execute(
        "UPDATE requests SET deleted = 1, updated_at = :1 \
         WHERE id = :2 AND owner_id = :3 AND deleted = 0",
        &[&now, &id, &owner_id],
    )?;
    conn.commit()?;
    Ok(stmt.row_count()? > 0)
}

/// Caller is responsible for the owner-or-admin check.
pub async fn set_request_active(pool: &DbPool, id: &str, active: bool) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let now = Utc::now();
    let stmt = conn.execute(
        "UPDATE requests SET is_active = :1, updated_at = :2 WHERE id = :3 AND deleted = 0",
        &[&(active as i32), &now, &id],
    )?;
    conn.commit()?;
    Ok(stmt.row_count()? > 0)
}

// ── Offers ───────────────────────────────────────────────────────────────────

/// Returns Ok(false) when the partial unique index rejects a second open
/// offer for the same (request, donor). The handler pre-check catches the
/// common case; this catches the race.
pub async fn insert_offer(pool: &DbPool, offer: &Offer) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let result = conn.execute(
        "INSERT INTO offers (id, request_id, kind, donor_id, recipient_id, message, method, \
         proposed_time, status, created_at, updated_at) \
         VALUES (:1, :2, :3, :4, :5, :6, :7, :8, :9, :10, :11)",
        &[
            &offer.id,
            &offer.request_id,
            &offer.kind.as_str(),
            &offer.donor_id,
            &offer.recipient_id,
            &offer.message,
            &offer.method,
            &offer.proposed_time,
            &offer.status.as_str(),
            &offer.created_at,
            &offer.updated_at,
        ],
    );
    match result {
        Ok(_) => {
            conn.commit()?;
            Ok(true)
        }
        Err(e) if e.to_string().contains("ORA-00001") => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub async fn get_offer(pool: &DbPool, id: &str) -> anyhow::Result<Option<Offer>> {
    let conn = pool.get()?;
    match conn.query_row("SELECT * FROM offers WHERE id = :1", &[&id]) {
        Ok(row) => Ok(Some(row_to_offer(&row)?)),
        Err(oracle::Error::NoDataFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The donor's open offer on a request, if any. Drives the duplicate-offer
/// pre-check and the "you already offered" client hint.
pub async fn find_open_offer(
    pool: &DbPool,
    request_id: &str,
    donor_id: &str,
) -> anyhow::Result<Option<Offer>> {
    let conn = pool.get()?;
    match conn.query_row(
        "SELECT * FROM offers WHERE request_id = :1 AND donor_id = :2 \
         AND status IN ('pending', 'accepted') ORDER BY created_at DESC FETCH FIRST 1 ROWS ONLY",
        &[&request_id, &donor_id],
    ) {
        Ok(row) => Ok(Some(row_to_offer(&row)?)),
        Err(oracle::Error::NoDataFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Every status the viewer has ever held on this request; input to the
/// contact-disclosure rule.
pub async fn list_offer_statuses(
    pool: &DbPool,
    request_id: &str,
    donor_id: &str,
) -> anyhow::Result<Vec<OfferStatus>> {
    let conn = pool.get()?;
    let rows = conn.query(
        "SELECT status FROM offers WHERE request_id = :1 AND donor_id = :2",
        &[&request_id, &donor_id],
    )?;
    let mut out = Vec::new();
    for row in rows {
        let raw: String = row?.get("STATUS")?;
        if let Some(status) = OfferStatus::parse(&raw) {
            out.push(status);
        }
    }
    Ok(out)
}

pub async fn list_offers_for_request(
    pool: &DbPool,
    request_id: &str,
) -> anyhow::Result<Vec<Offer>> {
    let conn = pool.get()?;
    let rows = conn.query(
        "SELECT * FROM offers WHERE request_id = :1 ORDER BY created_at DESC",
        &[&request_id],
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row_to_offer(&row?)?);
    }
    Ok(out)
}

pub async fn list_offers_sent(
    pool: &DbPool,
    donor_id: &str,
    kind: RequestKind,
) -> anyhow::Result<Vec<Offer>> {
    let conn = pool.get()?;
    let rows = conn.query(
        "SELECT * FROM offers WHERE donor_id = :1 AND kind = :2 ORDER BY created_at DESC",
        &[&donor_id, &kind.as_str()],
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row_to_offer(&row?)?);
    }
    Ok(out)
}

pub async fn list_offers_received(
    pool: &DbPool,
    recipient_id: &str,
    kind: RequestKind,
) -> anyhow::Result<Vec<Offer>> {
    let conn = pool.get()?;
    let rows = conn.query(
        "SELECT * FROM offers WHERE recipient_id = :1 AND kind = :2 ORDER BY created_at DESC",
        &[&recipient_id, &kind.as_str()],
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row_to_offer(&row?)?);
    }
    Ok(out)
}

/// Compare-and-swap status move. Returns false when the row is gone or no
/// longer in `from`, which makes every transition idempotent under races:
/// exactly one of two concurrent accepts wins.
pub async fn transition_offer(
    pool: &DbPool,
    id: &str,
    from: OfferStatus,
    to: OfferStatus,
) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let now = Utc::now();
    let stmt = conn.execute(
        "UPDATE offers SET status = :1, updated_at = :2 WHERE id = :3 AND status = :4",
        &[&to.as_str(), &now, &id, &from.as_str()],
    )?;
    conn.commit()?;
    Ok(stmt.row_count()? > 0)
}

/// fulfilled -> rated, carrying the rating payload in the same guarded write.
pub async fn rate_offer(
    pool: &DbPool,
    id: &str,
    stars: i32,
    comment: &Option<String>,
) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let now = Utc::now();
    let stmt = conn.execute(
        "UPDATE offers SET status = 'rated', stars = :1, rating_comment = :2, updated_at = :3 \
         WHERE id = :4 AND status = 'fulfilled'",
        &[&stars, comment, &now, &id],
    )?;
    conn.commit()?;
    Ok(stmt.row_count()? > 0)
}

/// Donor cancellation: a hard delete, guarded on pending so an accepted
/// offer can never be withdrawn out from under the owner.
pub async fn delete_pending_offer(pool: &DbPool, id: &str, donor_id: &str) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let stmt = conn.execute(
        "DELETE FROM offers WHERE id = :1 AND donor_id = :2 AND status = 'pending'",
        &[&id, &donor_id],
    )?;
    conn.commit()?;
    Ok(stmt.row_count()? > 0)
}

// ── Notifications ────────────────────────────────────────────────────────────

pub async fn insert_notification(
    pool: &DbPool,
    id: &str,
    recipient_id: &str,
    notification_type: &str,
    message: &str,
    reference_id: &Option<String>,
) -> anyhow::Result<()> {
    let conn = pool.get()?;
    let now = Utc::now();
    conn.execute(
        "INSERT INTO notifications (id, recipient_id, notification_type, message, reference_id, is_read, created_at) \
         VALUES (:1, :2, :3, :4, :5, 0, :6)",
        &[&id, &recipient_id, &notification_type, &message, reference_id, &now],
    )?;
    conn.commit()?;
    Ok(())
}

pub async fn list_notifications(
    pool: &DbPool,
    recipient_id: &str,
) -> anyhow::Result<Vec<Notification>> {
    let conn = pool.get()?;
    let rows = conn.query(
        "SELECT * FROM notifications WHERE recipient_id = :1 ORDER BY created_at DESC",
        &[&recipient_id],
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row_to_notification(&row?)?);
    }
    Ok(out)
}

pub async fn mark_notification_read(
    pool: &DbPool,
    recipient_id: &str,
    id: &str,
) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let stmt = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = :1 AND recipient_id = :2",
        &[&id, &recipient_id],
    )?;
    conn.commit()?;
    Ok(stmt.row_count()? > 0)
}

pub async fn mark_all_notifications_read(pool: &DbPool, recipient_id: &str) -> anyhow::Result<u64> {
    let conn = pool.get()?;
    let stmt = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE recipient_id = :1 AND is_read = 0",
        &[&recipient_id],
    )?;
    conn.commit()?;
    Ok(stmt.row_count()?)
}

// ── Audit log ────────────────────────────────────────────────────────────────

pub async fn log_audit(
    pool: &DbPool,
    id: &str,
    user_id: &str,
    action: &str,
    table_name: &str,
    record_id: &Option<String>,
    details: &Option<String>,
) -> anyhow::Result<()> {
    let conn = pool.get()?;
    let now = Utc::now();
    conn.execute(
        "INSERT INTO audit_logs (id, user_id, action, table_name, record_id, details, created_at) \
         VALUES (:1, :2, :3, :4, :5, :6, :7)",
        &[&id, &user_id, &action, &table_name, record_id, details, &now],
    )?;
    conn.commit()?;
    Ok(())
}

pub async fn list_audit_logs(
    pool: &DbPool,
    since: Option<DateTime<Utc>>,
) -> anyhow::Result<Vec<AuditLog>> {
    let conn = pool.get()?;
    let mut out = Vec::new();
    match since {
        Some(since) => {
            let rows = conn.query(
                "SELECT * FROM audit_logs WHERE created_at >= :1 ORDER BY created_at",
                &[&since],
            )?;
            for row in rows {
                out.push(row_to_audit(&row?)?);
            }
        }
        None => {
            let rows = conn.query("SELECT * FROM audit_logs ORDER BY created_at", &[])?;
            for row in rows {
                out.push(row_to_audit(&row?)?);
            }
        }
    }
    Ok(out)
}
