//! Offer lifecycle rules shared by both request variants.
//!
//! Everything here is a pure function of ids, statuses and timestamps so the
//! handlers can authorize and validate before touching the database, and the
//! unit tests can cover the whole transition table without a connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Blood,
    General,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Blood => "blood",
            RequestKind::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blood" => Some(RequestKind::Blood),
            "general" => Some(RequestKind::General),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Fulfilled,
    Rated,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
            OfferStatus::Fulfilled => "fulfilled",
            OfferStatus::Rated => "rated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OfferStatus::Pending),
            "accepted" => Some(OfferStatus::Accepted),
            "rejected" => Some(OfferStatus::Rejected),
            "fulfilled" => Some(OfferStatus::Fulfilled),
            "rated" => Some(OfferStatus::Rated),
            _ => None,
        }
    }

    /// An open offer blocks the same donor from submitting another one
    /// against the same request. Fulfilled offers are closed: the donation
    /// already happened, only the rating is outstanding.
    pub fn is_open(&self) -> bool {
        matches!(self, OfferStatus::Pending | OfferStatus::Accepted)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OfferStatus::Rejected | OfferStatus::Rated)
    }
}

/// Owner-driven status transitions plus the donor's cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAction {
    Accept,
    Reject,
    Fulfill,
    Rate,
    Cancel,
}

impl OfferAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferAction::Accept => "accept",
            OfferAction::Reject => "reject",
            OfferAction::Fulfill => "fulfill",
            OfferAction::Rate => "rate",
            OfferAction::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("only the request owner may {0} an offer")]
    OwnerOnly(&'static str),

    #[error("only the offer's donor may cancel it")]
    DonorOnly,

    #[error("cannot {action} an offer that is {from}", action = .action.as_str(), from = .from.as_str())]
    InvalidTransition {
        from: OfferStatus,
        action: OfferAction,
    },

    #[error("the request owner cannot offer on their own request")]
    SelfOffer,

    #[error("this request is past its deadline or inactive")]
    RequestClosed,

    #[error("an open offer already exists for this request")]
    DuplicateOffer,

    #[error("validation error: {0}")]
    Validation(String),
}

/// Returns the status an offer moves to under `action`, or the state-conflict
/// error when the edge is not in the transition table. Cancellation is a
/// deletion, not a status, so it has no target here.
pub fn next_status(from: OfferStatus, action: OfferAction) -> Result<OfferStatus, LifecycleError> {
    match (from, action) {
        (OfferStatus::Pending, OfferAction::Accept) => Ok(OfferStatus::Accepted),
        (OfferStatus::Pending, OfferAction::Reject) => Ok(OfferStatus::Rejected),
        (OfferStatus::Accepted, OfferAction::Fulfill) => Ok(OfferStatus::Fulfilled),
        (OfferStatus::Fulfilled, OfferAction::Rate) => Ok(OfferStatus::Rated),
        _ => Err(LifecycleError::InvalidTransition { from, action }),
    }
}

/// Checks that `actor` holds the role the action requires. Accept, reject,
/// fulfill and rate belong to the request owner; cancel belongs to the donor.
pub fn authorize(
    action: OfferAction,
    actor_id: &str,
    donor_id: &str,
    owner_id: &str,
) -> Result<(), LifecycleError> {
    match action {
        OfferAction::Cancel => {
            if actor_id == donor_id {
                Ok(())
            } else {
                Err(LifecycleError::DonorOnly)
            }
        }
        _ => {
            if actor_id == owner_id {
                Ok(())
            } else {
                Err(LifecycleError::OwnerOnly(action.as_str()))
            }
        }
    }
}

/// Read-time expiry. A request past its deadline still exists and stays
/// visible to its owner; it just stops taking new offers.
pub fn is_active(now: DateTime<Utc>, deadline: DateTime<Utc>) -> bool {
    now <= deadline
}

/// Guards offer creation: the request must be open for offers, the donor must
/// not be the owner, and the donor must not already hold an open offer.
pub fn check_new_offer(
    donor_id: &str,
    owner_id: &str,
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
    request_open: bool,
    existing_status: Option<OfferStatus>,
) -> Result<(), LifecycleError> {
    if donor_id == owner_id {
        return Err(LifecycleError::SelfOffer);
    }
    if !request_open || !is_active(now, deadline) {
        return Err(LifecycleError::RequestClosed);
    }
    if existing_status.map(|s| s.is_open()).unwrap_or(false) {
        return Err(LifecycleError::DuplicateOffer);
    }
    Ok(())
}

/// Disclosure rule for a request's contact methods: the owner always sees
/// them; a donor sees them once any of their offers on the request has moved
/// past pending into accepted, fulfilled or rated. Rejected offers disclose
/// nothing.
pub fn contact_visible<I>(viewer_id: &str, owner_id: &str, viewer_offer_statuses: I) -> bool
where
    I: IntoIterator<Item = OfferStatus>,
{
    if viewer_id == owner_id {
        return true;
    }
    viewer_offer_statuses.into_iter().any(|s| {
        matches!(
            s,
            OfferStatus::Accepted | OfferStatus::Fulfilled | OfferStatus::Rated
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn transition_table_edges() {
        assert_eq!(
            next_status(OfferStatus::Pending, OfferAction::Accept).unwrap(),
            OfferStatus::Accepted
        );
        assert_eq!(
            next_status(OfferStatus::Pending, OfferAction::Reject).unwrap(),
            OfferStatus::Rejected
        );
        assert_eq!(
            next_status(OfferStatus::Accepted, OfferAction::Fulfill).unwrap(),
            OfferStatus::Fulfilled
        );
        assert_eq!(
            next_status(OfferStatus::Fulfilled, OfferAction::Rate).unwrap(),
            OfferStatus::Rated
        );
    }

    #[test]
    fn everything_off_the_table_is_rejected() {
        let statuses = [
            OfferStatus::Pending,
            OfferStatus::Accepted,
            OfferStatus::Rejected,
            OfferStatus::Fulfilled,
            OfferStatus::Rated,
        ];
        let actions = [
            OfferAction::Accept,
            OfferAction::Reject,
            OfferAction::Fulfill,
            OfferAction::Rate,
        ];
        let allowed = [
            (OfferStatus::Pending, OfferAction::Accept),
            (OfferStatus::Pending, OfferAction::Reject),
            (OfferStatus::Accepted, OfferAction::Fulfill),
            (OfferStatus::Fulfilled, OfferAction::Rate),
        ];
        for from in statuses {
            for action in actions {
                let result = next_status(from, action);
                if allowed.contains(&(from, action)) {
                    assert!(result.is_ok(), "{from:?} + {action:?} should be allowed");
                } else {
                    assert_eq!(
                        result,
                        Err(LifecycleError::InvalidTransition { from, action }),
                        "{from:?} + {action:?} should be a state conflict"
                    );
                }
            }
        }
    }

    #[test]
    fn accept_twice_is_a_state_conflict() {
        // First accept moves pending -> accepted; the replay must not find an
        // edge, so no second notification can ever fire.
        let after = next_status(OfferStatus::Pending, OfferAction::Accept).unwrap();
        assert_eq!(
            next_status(after, OfferAction::Accept),
            Err(LifecycleError::InvalidTransition {
                from: OfferStatus::Accepted,
                action: OfferAction::Accept,
            })
        );
    }

    #[test]
    fn fulfill_rejected_offer_is_a_state_conflict() {
        assert_eq!(
            next_status(OfferStatus::Rejected, OfferAction::Fulfill),
            Err(LifecycleError::InvalidTransition {
                from: OfferStatus::Rejected,
                action: OfferAction::Fulfill,
            })
        );
    }

    #[test]
    fn owner_only_actions() {
        for action in [
            OfferAction::Accept,
            OfferAction::Reject,
            OfferAction::Fulfill,
            OfferAction::Rate,
        ] {
            assert!(authorize(action, "owner", "donor", "owner").is_ok());
            assert_eq!(
                authorize(action, "donor", "donor", "owner"),
                Err(LifecycleError::OwnerOnly(action.as_str()))
            );
            assert_eq!(
                authorize(action, "stranger", "donor", "owner"),
                Err(LifecycleError::OwnerOnly(action.as_str()))
            );
        }
    }

    #[test]
    fn cancel_is_donor_only() {
        assert!(authorize(OfferAction::Cancel, "donor", "donor", "owner").is_ok());
        assert_eq!(
            authorize(OfferAction::Cancel, "owner", "donor", "owner"),
            Err(LifecycleError::DonorOnly)
        );
    }

    #[test]
    fn cancel_only_while_pending() {
        // Cancellation deletes the row, so the guard is the status check the
        // handler runs before issuing the delete.
        for status in [
            OfferStatus::Accepted,
            OfferStatus::Rejected,
            OfferStatus::Fulfilled,
            OfferStatus::Rated,
        ] {
            assert_ne!(status, OfferStatus::Pending);
        }
        assert_eq!(OfferStatus::parse("pending"), Some(OfferStatus::Pending));
    }

    #[test]
    fn expiry_is_monotone_in_time() {
        let deadline = t0();
        assert!(is_active(deadline - Duration::hours(1), deadline));
        assert!(is_active(deadline, deadline));
        assert!(!is_active(deadline + Duration::seconds(1), deadline));
        // once false, never true again for any later instant
        assert!(!is_active(deadline + Duration::days(30), deadline));
    }

    #[test]
    fn new_offer_rejected_on_expired_request() {
        let now = t0();
        let yesterday = now - Duration::days(1);
        assert_eq!(
            check_new_offer("donor", "owner", now, yesterday, true, None),
            Err(LifecycleError::RequestClosed)
        );
    }

    #[test]
    fn new_offer_rejected_on_deactivated_request() {
        let now = t0();
        let tomorrow = now + Duration::days(1);
        assert_eq!(
            check_new_offer("donor", "owner", now, tomorrow, false, None),
            Err(LifecycleError::RequestClosed)
        );
    }

    #[test]
    fn owner_cannot_offer_on_own_request() {
        let now = t0();
        assert_eq!(
            check_new_offer("owner", "owner", now, now + Duration::days(1), true, None),
            Err(LifecycleError::SelfOffer)
        );
    }

    #[test]
    fn duplicate_open_offer_is_blocked() {
        let now = t0();
        let deadline = now + Duration::days(1);
        for open in [OfferStatus::Pending, OfferStatus::Accepted] {
            assert_eq!(
                check_new_offer("donor", "owner", now, deadline, true, Some(open)),
                Err(LifecycleError::DuplicateOffer)
            );
        }
        // closed prior offers do not block a fresh one
        for closed in [
            OfferStatus::Rejected,
            OfferStatus::Fulfilled,
            OfferStatus::Rated,
        ] {
            assert!(check_new_offer("donor", "owner", now, deadline, true, Some(closed)).is_ok());
        }
        assert!(check_new_offer("donor", "owner", now, deadline, true, None).is_ok());
    }

    #[test]
    fn contact_visibility_rule() {
        // owner always sees their own contact methods
        assert!(contact_visible("owner", "owner", []));
        // a stranger with no offers sees nothing
        assert!(!contact_visible("viewer", "owner", []));
        // pending and rejected disclose nothing
        assert!(!contact_visible("viewer", "owner", [OfferStatus::Pending]));
        assert!(!contact_visible("viewer", "owner", [OfferStatus::Rejected]));
        // anything past pending discloses
        for s in [
            OfferStatus::Accepted,
            OfferStatus::Fulfilled,
            OfferStatus::Rated,
        ] {
            assert!(contact_visible("viewer", "owner", [s]));
        }
        // unrelated offers do not leak visibility
        assert!(contact_visible(
            "viewer",
            "owner",
            [OfferStatus::Rejected, OfferStatus::Accepted]
        ));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            OfferStatus::Pending,
            OfferStatus::Accepted,
            OfferStatus::Rejected,
            OfferStatus::Fulfilled,
            OfferStatus::Rated,
        ] {
            assert_eq!(OfferStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OfferStatus::parse("cancelled"), None);
    }
}
