use chrono::{Duration, Utc};
use donor_connect::db;
use donor_connect::db::models::{ContactMethod, DonationRequest, Offer};
use donor_connect::lifecycle::{self, OfferAction, OfferStatus, RequestKind};
use uuid::Uuid;

fn test_request(owner_id: &str, kind: RequestKind) -> DonationRequest {
    let now = Utc::now();
    DonationRequest {
        id: format!("test-request-{}", Uuid::new_v4()),
        owner_id: owner_id.to_string(),
        kind,
        blood_type: match kind {
            RequestKind::Blood => Some("O+".to_string()),
            RequestKind::General => None,
        },
        category: match kind {
            RequestKind::General => Some("clothes".to_string()),
            RequestKind::Blood => None,
        },
        amount: None,
        description: Some("integration test".to_string()),
        place: Some("Nouakchott".to_string()),
        is_urgent: false,
        deadline: now + Duration::days(7),
        contact_methods: vec![ContactMethod {
            method: "phone".to_string(),
            number: "46123456".to_string(),
        }],
        is_active: true,
        deleted: false,
        created_at: now,
        updated_at: now,
    }
}

fn test_offer(request: &DonationRequest, donor_id: &str) -> Offer {
    let now = Utc::now();
    Offer {
        id: format!("test-offer-{}", Uuid::new_v4()),
        request_id: request.id.clone(),
        kind: request.kind,
        donor_id: donor_id.to_string(),
        recipient_id: request.owner_id.clone(),
        message: Some("I can help".to_string()),
        method: Some("phone".to_string()),
        proposed_time: None,
        status: OfferStatus::Pending,
        stars: None,
        rating_comment: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn offer_walks_the_full_lifecycle() {
    std::env::set_var("RUST_ENV", "development");
    let pool = db::init_pool().await.expect("init pool");

    let owner_id = format!("test-owner-{}", Uuid::new_v4());
    let donor_id = format!("test-donor-{}", Uuid::new_v4());
    db::upsert_user(&pool, &owner_id, &None, "Req", "Owner", "local")
        .await
        .expect("upsert owner");
    db::upsert_user(&pool, &donor_id, &None, "Don", "Or", "local")
        .await
        .expect("upsert donor");

    let request = test_request(&owner_id, RequestKind::General);
    db::insert_request(&pool, &request).await.expect("insert_request");

    let offer = test_offer(&request, &donor_id);
    assert!(db::insert_offer(&pool, &offer).await.expect("insert_offer"));

    // pending -> accepted discloses contacts to the donor
    assert!(db::transition_offer(&pool, &offer.id, OfferStatus::Pending, OfferStatus::Accepted)
        .await
        .expect("accept"));
    let statuses = db::list_offer_statuses(&pool, &request.id, &donor_id)
        .await
        .expect("statuses");
    assert!(lifecycle::contact_visible(&donor_id, &owner_id, statuses));

    // replaying the same accept must not find a pending row
    assert!(!db::transition_offer(&pool, &offer.id, OfferStatus::Pending, OfferStatus::Accepted)
        .await
        .expect("accept replay"));

    // accepted -> fulfilled -> rated
    assert!(db::transition_offer(&pool, &offer.id, OfferStatus::Accepted, OfferStatus::Fulfilled)
        .await
        .expect("fulfill"));
    assert!(db::rate_offer(&pool, &offer.id, 5, &Some("fast and kind".to_string()))
        .await
        .expect("rate"));

    let stored = db::get_offer(&pool, &offer.id)
        .await
        .expect("get_offer")
        .expect("offer exists");
    assert_eq!(stored.status, OfferStatus::Rated);
    assert_eq!(stored.stars, Some(5));
}

#[tokio::test]
async fn open_offer_blocks_a_duplicate() {
    std::env::set_var("RUST_ENV", "development");
    let pool = db::init_pool().await.expect("init pool");

    let owner_id = format!("test-owner-{}", Uuid::new_v4());
    let donor_id = format!("test-donor-{}", Uuid::new_v4());
    let request = test_request(&owner_id, RequestKind::Blood);
    db::insert_request(&pool, &request).await.expect("insert_request");

    let first = test_offer(&request, &donor_id);
    assert!(db::insert_offer(&pool, &first).await.expect("first offer"));

    // the pre-check sees the open offer
    let existing = db::find_open_offer(&pool, &request.id, &donor_id)
        .await
        .expect("find_open_offer")
        .expect("open offer present");
    assert_eq!(existing.id, first.id);
    assert_eq!(existing.status, OfferStatus::Pending);

    // the unique index rejects the race path
    let second = test_offer(&request, &donor_id);
    assert!(!db::insert_offer(&pool, &second).await.expect("second offer"));

    // a rejected offer no longer blocks
    assert!(db::transition_offer(&pool, &first.id, OfferStatus::Pending, OfferStatus::Rejected)
        .await
        .expect("reject"));
    assert!(db::find_open_offer(&pool, &request.id, &donor_id)
        .await
        .expect("find after reject")
        .is_none());
    let third = test_offer(&request, &donor_id);
    assert!(db::insert_offer(&pool, &third).await.expect("third offer"));
}

#[tokio::test]
async fn cancellation_only_removes_pending_offers() {
    std::env::set_var("RUST_ENV", "development");
    let pool = db::init_pool().await.expect("init pool");

    let owner_id = format!("test-owner-{}", Uuid::new_v4());
    let donor_id = format!("test-donor-{}", Uuid::new_v4());
    let request = test_request(&owner_id, RequestKind::General);
    db::insert_request(&pool, &request).await.expect("insert_request");

    let offer = test_offer(&request, &donor_id);
    assert!(db::insert_offer(&pool, &offer).await.expect("insert_offer"));
    assert!(db::transition_offer(&pool, &offer.id, OfferStatus::Pending, OfferStatus::Accepted)
        .await
        .expect("accept"));

    // accepted offers cannot be withdrawn
    assert!(!db::delete_pending_offer(&pool, &offer.id, &donor_id)
        .await
        .expect("delete accepted"));
    assert!(db::get_offer(&pool, &offer.id)
        .await
        .expect("get_offer")
        .is_some());

    let pending = test_offer(&request, &format!("test-donor-{}", Uuid::new_v4()));
    let pending_donor = pending.donor_id.clone();
    assert!(db::insert_offer(&pool, &pending).await.expect("insert pending"));
    assert!(db::delete_pending_offer(&pool, &pending.id, &pending_donor)
        .await
        .expect("delete pending"));
    assert!(db::get_offer(&pool, &pending.id)
        .await
        .expect("get_offer")
        .is_none());
}

#[tokio::test]
async fn expired_request_refuses_new_offers() {
    std::env::set_var("RUST_ENV", "development");
    let pool = db::init_pool().await.expect("init pool");

    let owner_id = format!("test-owner-{}", Uuid::new_v4());
    let donor_id = format!("test-donor-{}", Uuid::new_v4());
    let mut request = test_request(&owner_id, RequestKind::Blood);
    request.deadline = Utc::now() - Duration::days(1);
    db::insert_request(&pool, &request).await.expect("insert_request");

    // the guard the create handler runs
    let now = Utc::now();
    let verdict = lifecycle::check_new_offer(
        &donor_id,
        &request.owner_id,
        now,
        request.deadline,
        request.is_active,
        None,
    );
    assert!(verdict.is_err());

    // the request itself is untouched and still readable by its owner
    let stored = db::get_request(&pool, &request.id)
        .await
        .expect("get_request")
        .expect("request exists");
    assert!(stored.is_active);
    assert!(!lifecycle::is_active(now, stored.deadline));
}

#[tokio::test]
async fn notifications_and_audit_rows_round_trip() {
    std::env::set_var("RUST_ENV", "development");
    let pool = db::init_pool().await.expect("init pool");

    let recipient = format!("test-user-{}", Uuid::new_v4());
    let notif_id = format!("test-notif-{}", Uuid::new_v4());
    db::insert_notification(
        &pool,
        &notif_id,
        &recipient,
        "offer_received",
        "Someone offered to help with your request",
        &Some("ref-1".to_string()),
    )
    .await
    .expect("insert_notification");

    let list = db::list_notifications(&pool, &recipient)
        .await
        .expect("list_notifications");
    assert_eq!(list.len(), 1);
    assert!(!list[0].is_read);

    assert!(db::mark_notification_read(&pool, &recipient, &notif_id)
        .await
        .expect("mark_read"));
    let list = db::list_notifications(&pool, &recipient)
        .await
        .expect("list_notifications");
    assert!(list[0].is_read);

    let audit_id = format!("test-audit-{}", Uuid::new_v4());
    db::log_audit(
        &pool,
        &audit_id,
        &recipient,
        "accept",
        "offers",
        &Some("ref-1".to_string()),
        &None,
    )
    .await
    .expect("log_audit");
    let logs = db::list_audit_logs(&pool, None).await.expect("list_audit_logs");
    assert!(logs.iter().any(|l| l.id == audit_id));
}

#[test]
fn next_status_matches_the_cas_expectations() {
    // The db layer trusts the state machine for its WHERE clauses; keep the
    // two views of the table in sync.
    assert_eq!(
        lifecycle::next_status(OfferStatus::Pending, OfferAction::Accept).unwrap(),
        OfferStatus::Accepted
    );
    assert_eq!(
        lifecycle::next_status(OfferStatus::Accepted, OfferAction::Fulfill).unwrap(),
        OfferStatus::Fulfilled
    );
    assert!(lifecycle::next_status(OfferStatus::Rejected, OfferAction::Fulfill).is_err());
}
