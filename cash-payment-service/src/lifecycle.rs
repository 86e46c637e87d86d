//! Reservation state machine.
//!
//! ```text
//! PENDING ──issue_code──> CODE_ISSUED ──redeem──> PAID
//!    │                       │  ^  │
//!    │                       │  └──┘ regenerate
//!    ├──cancel──> CANCELLED <┤
//!    └──sweep───> EXPIRED   <┘ lazy expiry on lookup
//! ```
//!
//! The guards here are pure; persistence applies them with status-conditioned
//! updates so a concurrent transition makes the write affect zero rows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{CartLine, Identity, ReservationStatus};
use uuid::Uuid;

use crate::error::{CashPaymentError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: i32,
    pub cart: Vec<CartLine>,
    pub code: Option<String>,
    pub status: ReservationStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDecision {
    Proceed,
    AlreadyCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionCheck {
    Redeemable,
    /// Code is past `expires_at`; the caller must persist `EXPIRED`.
    LapsedCode,
}

impl Reservation {
    pub fn new(user_id: i32, cart: Vec<CartLine>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            cart,
            code: None,
            status: ReservationStatus::Pending,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn code_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::CodeIssued
            && self.expires_at.map_or(false, |expires_at| expires_at <= now)
    }

    pub fn ensure_accessible_by(&self, identity: &Identity, action: &'static str) -> Result<()> {
        if identity.can_act_for(self.user_id) {
            Ok(())
        } else {
            Err(CashPaymentError::Forbidden(action))
        }
    }

    pub fn check_issuable(&self, allow_regenerate: bool) -> Result<()> {
        match self.status {
            ReservationStatus::Pending => Ok(()),
            ReservationStatus::CodeIssued if allow_regenerate => Ok(()),
            status => Err(CashPaymentError::InvalidState {
                action: "issue a code for",
                status,
            }),
        }
    }

    pub fn check_cancellable(&self) -> Result<CancelDecision> {
        match self.status {
            ReservationStatus::Pending | ReservationStatus::CodeIssued => Ok(CancelDecision::Proceed),
            ReservationStatus::Cancelled => Ok(CancelDecision::AlreadyCancelled),
            status => Err(CashPaymentError::InvalidState { action: "cancel", status }),
        }
    }

    pub fn check_cart_editable(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CashPaymentError::InvalidState {
                action: "change the cart of",
                status: self.status,
            })
        }
    }

    /// Decides what a presented code means for this reservation.
    pub fn redemption_check(&self, now: DateTime<Utc>) -> Result<RedemptionCheck> {
        match self.status {
            ReservationStatus::Paid => Err(CashPaymentError::AlreadyUsed),
            ReservationStatus::Cancelled => Err(CashPaymentError::Cancelled),
            ReservationStatus::Expired => Err(CashPaymentError::Expired),
            ReservationStatus::CodeIssued => match self.expires_at {
                Some(expires_at) if expires_at > now => Ok(RedemptionCheck::Redeemable),
                Some(_) => Ok(RedemptionCheck::LapsedCode),
                None => Err(CashPaymentError::InvalidState {
                    action: "redeem",
                    status: self.status,
                }),
            },
            ReservationStatus::Pending => Err(CashPaymentError::InvalidState {
                action: "redeem",
                status: self.status,
            }),
        }
    }
}

/// Rejects carts that could never be fulfilled, before any state is touched.
pub fn validate_cart(cart: &[CartLine]) -> Result<()> {
    if cart.is_empty() {
        return Err(CashPaymentError::Validation("cart is empty".into()));
    }
    for line in cart {
        if line.barcode.trim().is_empty() {
            return Err(CashPaymentError::Validation("cart line has an empty barcode".into()));
        }
        if line.quantity <= 0 {
            return Err(CashPaymentError::Validation(format!(
                "quantity for {} must be positive, got {}",
                line.barcode, line.quantity
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn issued(now: DateTime<Utc>, ttl: Duration) -> Reservation {
        let mut reservation = Reservation::new(7, vec![CartLine::new("A1", 2)], now);
        reservation.status = ReservationStatus::CodeIssued;
        reservation.code = Some("123456".into());
        reservation.expires_at = Some(now + ttl);
        reservation
    }

    #[test]
    fn new_reservation_is_pending_without_code() {
        let reservation = Reservation::new(7, vec![CartLine::new("A1", 2)], Utc::now());
        assert_eq!(reservation.status, ReservationStatus::Pending);
        assert!(reservation.code.is_none());
        assert!(reservation.expires_at.is_none());
    }

    #[test]
    fn code_can_be_issued_from_pending_and_regenerated_when_allowed() {
        let now = Utc::now();
        let pending = Reservation::new(7, vec![CartLine::new("A1", 1)], now);
        assert!(pending.check_issuable(false).is_ok());

        let issued = issued(now, Duration::minutes(10));
        assert!(issued.check_issuable(true).is_ok());
        assert!(matches!(
            issued.check_issuable(false),
            Err(CashPaymentError::InvalidState { status: ReservationStatus::CodeIssued, .. })
        ));
    }

    #[test]
    fn terminal_reservations_reject_code_issuance() {
        let mut reservation = Reservation::new(7, vec![CartLine::new("A1", 1)], Utc::now());
        for status in [ReservationStatus::Paid, ReservationStatus::Cancelled, ReservationStatus::Expired] {
            reservation.status = status;
            assert!(matches!(
                reservation.check_issuable(true),
                Err(CashPaymentError::InvalidState { .. })
            ));
        }
    }

    #[test]
    fn cancelling_twice_is_a_no_op() {
        let mut reservation = Reservation::new(7, vec![CartLine::new("A1", 1)], Utc::now());
        assert_eq!(reservation.check_cancellable().unwrap(), CancelDecision::Proceed);
        reservation.status = ReservationStatus::Cancelled;
        assert_eq!(reservation.check_cancellable().unwrap(), CancelDecision::AlreadyCancelled);
        reservation.status = ReservationStatus::Paid;
        assert!(reservation.check_cancellable().is_err());
    }

    #[test]
    fn redemption_check_distinguishes_every_dead_code() {
        let now = Utc::now();
        let mut reservation = issued(now, Duration::minutes(10));
        assert_eq!(reservation.redemption_check(now).unwrap(), RedemptionCheck::Redeemable);

        reservation.status = ReservationStatus::Paid;
        assert!(matches!(reservation.redemption_check(now), Err(CashPaymentError::AlreadyUsed)));
        reservation.status = ReservationStatus::Cancelled;
        assert!(matches!(reservation.redemption_check(now), Err(CashPaymentError::Cancelled)));
        reservation.status = ReservationStatus::Expired;
        assert!(matches!(reservation.redemption_check(now), Err(CashPaymentError::Expired)));
    }

    #[test]
    fn code_is_lapsed_at_its_expiry_instant() {
        let now = Utc::now();
        let reservation = issued(now, Duration::seconds(30));
        assert!(!reservation.code_lapsed(now));
        let at_expiry = now + Duration::seconds(30);
        assert!(reservation.code_lapsed(at_expiry));
        assert_eq!(
            reservation.redemption_check(at_expiry).unwrap(),
            RedemptionCheck::LapsedCode
        );
    }

    #[test]
    fn only_owner_or_admin_may_touch_a_reservation() {
        let reservation = Reservation::new(7, vec![CartLine::new("A1", 1)], Utc::now());
        assert!(reservation.ensure_accessible_by(&Identity::customer(7), "cancel").is_ok());
        assert!(reservation.ensure_accessible_by(&Identity::admin(1), "cancel").is_ok());
        assert!(matches!(
            reservation.ensure_accessible_by(&Identity::customer(8), "cancel"),
            Err(CashPaymentError::Forbidden("cancel"))
        ));
    }

    #[test]
    fn cart_validation_rejects_empty_and_non_positive_lines() {
        assert!(validate_cart(&[]).is_err());
        assert!(validate_cart(&[CartLine::new("A1", 0)]).is_err());
        assert!(validate_cart(&[CartLine::new("A1", -3)]).is_err());
        assert!(validate_cart(&[CartLine::new("  ", 1)]).is_err());
        assert!(validate_cart(&[CartLine::new("A1", 2), CartLine::new("B2", 1)]).is_ok());
    }
}
