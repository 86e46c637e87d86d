//! Redemption: code check, stock commit, sale write and the `PAID`
//! transition, executed inside one unit of work supplied by the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{ReservationStatus, SaleLine, SaleReceipt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CashPaymentError, Result};
use crate::ledger::{self, StockLedger};
use crate::lifecycle::{RedemptionCheck, Reservation};

/// An open transaction over reservations, stock and the sales ledger.
///
/// Implementations commit everything done through this handle when the
/// workflow returns `Ok`, and nothing when it returns `Err`.
#[async_trait]
pub trait RedemptionTx: StockLedger {
    /// Finds the reservation holding `code` and locks it for the rest of the
    /// transaction. A live (non-cancelled) holder wins over cancelled ones.
    async fn lock_by_code(&mut self, code: &str) -> Result<Option<Reservation>>;

    async fn set_status(
        &mut self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn record_sale(&mut self, user_id: i32, lines: &[SaleLine], at: DateTime<Utc>) -> Result<Uuid>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedemptionOutcome {
    Paid(SaleReceipt),
    /// The code had lapsed; the reservation was moved to `EXPIRED` and that
    /// transition must be committed.
    Expired { reservation_id: Uuid },
}

pub async fn redeem_within<T: RedemptionTx + ?Sized>(
    tx: &mut T,
    code: &str,
    now: DateTime<Utc>,
) -> Result<RedemptionOutcome> {
    let reservation = tx
        .lock_by_code(code)
        .await?
        .ok_or(CashPaymentError::NotFound("cash code"))?;

    if reservation.redemption_check(now)? == RedemptionCheck::LapsedCode {
        tx.set_status(
            reservation.id,
            ReservationStatus::CodeIssued,
            ReservationStatus::Expired,
            now,
        )
        .await?;
        info!(reservation_id = %reservation.id, "Cash code expired on redemption attempt");
        return Ok(RedemptionOutcome::Expired {
            reservation_id: reservation.id,
        });
    }

    let lines = ledger::reserve_and_commit(tx, &reservation.cart).await?;
    let sale_id = tx.record_sale(reservation.user_id, &lines, now).await?;

    let paid = tx
        .set_status(
            reservation.id,
            ReservationStatus::CodeIssued,
            ReservationStatus::Paid,
            now,
        )
        .await?;
    if !paid {
        warn!(reservation_id = %reservation.id, "Reservation changed under its row lock");
        return Err(CashPaymentError::AlreadyUsed);
    }

    Ok(RedemptionOutcome::Paid(SaleReceipt::new(
        sale_id,
        reservation.user_id,
        lines,
        now,
    )))
}
