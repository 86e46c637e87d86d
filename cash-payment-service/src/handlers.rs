use std::sync::Arc;

use shared::{CartLine, Identity, ReservationStatus, SaleReceipt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::code::CodeGenerator;
use crate::config::{CodeIssuers, ResubmitPolicy, ServiceConfig};
use crate::error::{CashPaymentError, Result};
use crate::ledger;
use crate::lifecycle::{self, CancelDecision, Reservation};
use crate::store::{Insertion, ReservationStore};
use crate::workflow::RedemptionOutcome;

/// Result of submitting a cart.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Created(Reservation),
    /// The user's active reservation, returned unchanged.
    Existing(Reservation),
}

impl Submission {
    pub fn reservation(&self) -> &Reservation {
        match self {
            Submission::Created(r) | Submission::Existing(r) => r,
        }
    }

    pub fn into_reservation(self) -> Reservation {
        match self {
            Submission::Created(r) | Submission::Existing(r) => r,
        }
    }
}

pub struct CashPaymentHandler<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    codes: CodeGenerator,
    config: ServiceConfig,
}

impl<S: ?Sized> Clone for CashPaymentHandler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            codes: self.codes,
            config: self.config.clone(),
        }
    }
}

impl<S: ReservationStore + ?Sized> CashPaymentHandler<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: ServiceConfig) -> Self {
        let codes = config.code_generator();
        Self { store, clock, codes, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn create_reservation(&self, identity: &Identity, cart: Vec<CartLine>) -> Result<Submission> {
        lifecycle::validate_cart(&cart)?;

        // An active reservation answers the resubmission whatever stock looks like now.
        if let Some(existing) = self.live_reservation_for(identity.user_id).await? {
            return self.resubmitted(existing);
        }

        ledger::check_availability(&*self.store, &cart).await?;
        let now = self.clock.now();

        match self.store.insert(Reservation::new(identity.user_id, cart, now)).await? {
            Insertion::Created(reservation) => {
                info!(
                    reservation_id = %reservation.id,
                    user_id = reservation.user_id,
                    lines = reservation.cart.len(),
                    "Cash reservation created"
                );
                Ok(Submission::Created(reservation))
            }
            Insertion::ActiveExists => {
                // Lost a race against a concurrent submission by the same user.
                let existing = self
                    .store
                    .find_active_for_user(identity.user_id)
                    .await?
                    .ok_or_else(|| {
                        CashPaymentError::Conflict(format!(
                            "active reservation for user {} changed during submission",
                            identity.user_id
                        ))
                    })?;
                self.resubmitted(existing)
            }
        }
    }

    /// The user's active reservation, after retiring one whose code lapsed.
    async fn live_reservation_for(&self, user_id: i32) -> Result<Option<Reservation>> {
        let Some(existing) = self.store.find_active_for_user(user_id).await? else {
            return Ok(None);
        };
        let now = self.clock.now();
        if existing.code_lapsed(now) {
            self.store
                .transition(existing.id, ReservationStatus::CodeIssued, ReservationStatus::Expired, now)
                .await?;
            info!(reservation_id = %existing.id, user_id, "Lapsed reservation expired on resubmission");
            return self.store.find_active_for_user(user_id).await;
        }
        Ok(Some(existing))
    }

    fn resubmitted(&self, existing: Reservation) -> Result<Submission> {
        match self.config.resubmit_policy {
            ResubmitPolicy::ReturnExisting => {
                debug!(reservation_id = %existing.id, "Returning existing active reservation");
                Ok(Submission::Existing(existing))
            }
            ResubmitPolicy::Reject => Err(CashPaymentError::ActiveReservationExists {
                user_id: existing.user_id,
                reservation_id: existing.id,
            }),
        }
    }

    pub async fn issue_code(&self, identity: &Identity, reservation_id: Uuid) -> Result<Reservation> {
        let reservation = self.load(reservation_id).await?;
        match self.config.code_issuers {
            CodeIssuers::AdminOnly if !identity.is_admin() => {
                return Err(CashPaymentError::Forbidden("issue cash codes"));
            }
            _ => reservation.ensure_accessible_by(identity, "issue a code for this reservation")?,
        }
        let reservation = self.expire_if_lapsed(reservation).await?;
        reservation.check_issuable(self.config.allow_regenerate)?;

        let now = self.clock.now();
        let expires_at = now + self.config.code_ttl;
        let issued = self.codes.issue(&*self.store, &reservation, expires_at, now).await?;

        info!(
            reservation_id = %issued.id,
            issued_by = identity.user_id,
            regenerated = reservation.status == ReservationStatus::CodeIssued,
            expires_at = %expires_at,
            "Cash code issued"
        );
        Ok(issued)
    }

    /// Status lookup; lazily expires a lapsed code so the caller sees `EXPIRED`.
    pub async fn reservation_status(&self, identity: &Identity, reservation_id: Uuid) -> Result<Reservation> {
        let reservation = self.load(reservation_id).await?;
        reservation.ensure_accessible_by(identity, "view this reservation")?;
        self.expire_if_lapsed(reservation).await
    }

    /// Persists `EXPIRED` for a reservation whose code has lapsed and returns
    /// the current record either way.
    async fn expire_if_lapsed(&self, reservation: Reservation) -> Result<Reservation> {
        let now = self.clock.now();
        if !reservation.code_lapsed(now) {
            return Ok(reservation);
        }
        match self
            .store
            .transition(reservation.id, ReservationStatus::CodeIssued, ReservationStatus::Expired, now)
            .await?
        {
            Some(expired) => {
                info!(reservation_id = %expired.id, "Lapsed cash code expired");
                Ok(expired)
            }
            None => self.load(reservation.id).await,
        }
    }

    pub async fn cancel(&self, identity: &Identity, reservation_id: Uuid) -> Result<Reservation> {
        let reservation = self.load(reservation_id).await?;
        self.cancel_loaded(identity, reservation).await
    }

    pub async fn cancel_by_code(&self, identity: &Identity, code: &str) -> Result<Reservation> {
        if !self.codes.is_well_formed(code) {
            return Err(CashPaymentError::Validation(format!(
                "cash codes are {} digits",
                self.codes.width()
            )));
        }
        let reservation = self
            .store
            .find_by_code(code)
            .await?
            .ok_or(CashPaymentError::NotFound("cash code"))?;
        self.cancel_loaded(identity, reservation).await
    }

    async fn cancel_loaded(&self, identity: &Identity, reservation: Reservation) -> Result<Reservation> {
        reservation.ensure_accessible_by(identity, "cancel this reservation")?;
        let reservation = self.expire_if_lapsed(reservation).await?;
        if reservation.check_cancellable()? == CancelDecision::AlreadyCancelled {
            debug!(reservation_id = %reservation.id, "Reservation already cancelled");
            return Ok(reservation);
        }

        let now = self.clock.now();
        match self
            .store
            .transition(reservation.id, reservation.status, ReservationStatus::Cancelled, now)
            .await?
        {
            Some(cancelled) => {
                info!(
                    reservation_id = %cancelled.id,
                    cancelled_by = identity.user_id,
                    "Cash reservation cancelled"
                );
                Ok(cancelled)
            }
            None => {
                // Status moved underneath us; judge the cancel against the new one.
                let current = self.load(reservation.id).await?;
                match current.check_cancellable()? {
                    CancelDecision::AlreadyCancelled => Ok(current),
                    CancelDecision::Proceed => Err(CashPaymentError::Conflict(format!(
                        "reservation {} changed while cancelling",
                        current.id
                    ))),
                }
            }
        }
    }

    pub async fn update_cart(
        &self,
        identity: &Identity,
        reservation_id: Uuid,
        cart: Vec<CartLine>,
    ) -> Result<Reservation> {
        lifecycle::validate_cart(&cart)?;
        let reservation = self.load(reservation_id).await?;
        reservation.ensure_accessible_by(identity, "change this cart")?;
        let reservation = self.expire_if_lapsed(reservation).await?;
        reservation.check_cart_editable()?;
        ledger::check_availability(&*self.store, &cart).await?;

        let now = self.clock.now();
        match self
            .store
            .replace_cart(reservation.id, reservation.status, &cart, now)
            .await?
        {
            Some(updated) => {
                info!(reservation_id = %updated.id, lines = updated.cart.len(), "Cart updated");
                Ok(updated)
            }
            None => {
                let current = self.load(reservation.id).await?;
                current.check_cart_editable()?;
                Err(CashPaymentError::Conflict(format!(
                    "reservation {} changed while updating its cart",
                    current.id
                )))
            }
        }
    }

    pub async fn redeem(&self, identity: &Identity, code: &str) -> Result<SaleReceipt> {
        if !self.codes.is_well_formed(code) {
            return Err(CashPaymentError::Validation(format!(
                "cash codes are {} digits",
                self.codes.width()
            )));
        }

        let now = self.clock.now();
        match self.store.redeem(code, now).await {
            Ok(RedemptionOutcome::Paid(receipt)) => {
                info!(
                    sale_id = %receipt.sale_id,
                    user_id = receipt.user_id,
                    redeemed_by = identity.user_id,
                    total = %receipt.total,
                    "Cash payment redeemed"
                );
                Ok(receipt)
            }
            Ok(RedemptionOutcome::Expired { reservation_id }) => {
                debug!(reservation_id = %reservation_id, "Redemption refused, code expired");
                Err(CashPaymentError::Expired)
            }
            Err(e) => {
                if e.is_server_error() {
                    warn!(error = %e, "Redemption failed");
                } else {
                    debug!(error = %e, "Redemption refused");
                }
                Err(e)
            }
        }
    }

    pub async fn list_pending(&self, identity: &Identity) -> Result<Vec<Reservation>> {
        if !identity.is_admin() {
            return Err(CashPaymentError::Forbidden("list pending cash requests"));
        }
        self.store.list_active().await
    }

    async fn load(&self, reservation_id: Uuid) -> Result<Reservation> {
        self.store
            .get(reservation_id)
            .await?
            .ok_or(CashPaymentError::NotFound("reservation"))
    }
}
