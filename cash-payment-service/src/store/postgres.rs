use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{CartLine, CatalogItem, ReservationStatus, SaleLine};
use tracing::debug;
use uuid::Uuid;

use super::{CodeAssignment, Insertion, ReservationStore};
use crate::error::{CashPaymentError, Result};
use crate::ledger::{Catalog, StockLedger};
use crate::lifecycle::Reservation;
use crate::models::*;
use crate::schema::*;
use crate::workflow::{self, RedemptionOutcome, RedemptionTx};

pub type DbPool = Pool<AsyncPgConnection>;

const CANCELLED: &str = "CANCELLED";

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &DieselError) -> bool {
    matches!(err, DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
}

fn into_reservation(row: Option<PendingCashPayment>) -> Result<Option<Reservation>> {
    row.map(Reservation::try_from).transpose()
}

async fn load_by_code(conn: &mut AsyncPgConnection, code: &str, lock: bool) -> Result<Option<Reservation>> {
    let live = pending_cash_payments::table
        .filter(pending_cash_payments::code.eq(code))
        .filter(pending_cash_payments::status.ne(CANCELLED));
    let row = if lock {
        live.for_update().first::<PendingCashPayment>(conn).await.optional()?
    } else {
        live.first::<PendingCashPayment>(conn).await.optional()?
    };
    if row.is_some() {
        return into_reservation(row);
    }

    let cancelled = pending_cash_payments::table
        .filter(pending_cash_payments::code.eq(code))
        .order(pending_cash_payments::updated_at.desc())
        .first::<PendingCashPayment>(conn)
        .await
        .optional()?;
    into_reservation(cancelled)
}

#[async_trait]
impl StockLedger for AsyncPgConnection {
    async fn lookup(&mut self, barcode: &str) -> Result<Option<CatalogItem>> {
        let item = items::table
            .filter(items::barcode.eq(barcode))
            .first::<Item>(self)
            .await
            .optional()?;
        Ok(item.map(CatalogItem::from))
    }

    async fn decrement(&mut self, item_id: i32, quantity: i32) -> Result<Option<CatalogItem>> {
        let updated = diesel::update(
            items::table
                .filter(items::id.eq(item_id))
                .filter(items::quantity.ge(quantity)),
        )
        .set(items::quantity.eq(items::quantity - quantity))
        .get_result::<Item>(self)
        .await
        .optional()?;
        Ok(updated.map(CatalogItem::from))
    }
}

#[async_trait]
impl RedemptionTx for AsyncPgConnection {
    async fn lock_by_code(&mut self, code: &str) -> Result<Option<Reservation>> {
        load_by_code(self, code, true).await
    }

    async fn set_status(
        &mut self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let updated_rows = diesel::update(
            pending_cash_payments::table
                .filter(pending_cash_payments::id.eq(id))
                .filter(pending_cash_payments::status.eq(from.as_str())),
        )
        .set((
            pending_cash_payments::status.eq(to.as_str()),
            pending_cash_payments::updated_at.eq(at),
        ))
        .execute(self)
        .await?;
        Ok(updated_rows == 1)
    }

    async fn record_sale(&mut self, user_id: i32, lines: &[SaleLine], at: DateTime<Utc>) -> Result<Uuid> {
        let transaction = NewSalesTransaction {
            id: Uuid::new_v4(),
            user_id,
            date: at,
        };
        diesel::insert_into(sales_transactions::table)
            .values(&transaction)
            .execute(self)
            .await?;

        let transaction_items: Vec<NewSalesTransactionItem> = lines
            .iter()
            .map(|line| NewSalesTransactionItem::from_line(transaction.id, line))
            .collect();
        diesel::insert_into(sales_transaction_items::table)
            .values(&transaction_items)
            .execute(self)
            .await?;

        Ok(transaction.id)
    }
}

#[async_trait]
impl Catalog for PgStore {
    async fn lookup_item(&self, barcode: &str) -> Result<Option<CatalogItem>> {
        let mut conn = self.pool.get().await?;
        StockLedger::lookup(&mut *conn, barcode).await
    }
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn insert(&self, reservation: Reservation) -> Result<Insertion> {
        let mut conn = self.pool.get().await?;
        let new_payment = NewPendingCashPayment::try_from(&reservation)?;

        match diesel::insert_into(pending_cash_payments::table)
            .values(&new_payment)
            .get_result::<PendingCashPayment>(&mut conn)
            .await
        {
            Ok(row) => Ok(Insertion::Created(row.try_into()?)),
            Err(e) if is_unique_violation(&e) => {
                debug!(user_id = reservation.user_id, "Active reservation already present");
                Ok(Insertion::ActiveExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>> {
        let mut conn = self.pool.get().await?;
        let row = pending_cash_payments::table
            .filter(pending_cash_payments::id.eq(id))
            .first::<PendingCashPayment>(&mut conn)
            .await
            .optional()?;
        into_reservation(row)
    }

    async fn find_active_for_user(&self, user_id: i32) -> Result<Option<Reservation>> {
        let mut conn = self.pool.get().await?;
        let active: Vec<&str> = ReservationStatus::ACTIVE.iter().map(|s| s.as_str()).collect();
        let row = pending_cash_payments::table
            .filter(pending_cash_payments::user_id.eq(user_id))
            .filter(pending_cash_payments::status.eq_any(active))
            .first::<PendingCashPayment>(&mut conn)
            .await
            .optional()?;
        into_reservation(row)
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Reservation>> {
        let mut conn = self.pool.get().await?;
        load_by_code(&mut conn, code, false).await
    }

    async fn list_active(&self) -> Result<Vec<Reservation>> {
        let mut conn = self.pool.get().await?;
        let active: Vec<&str> = ReservationStatus::ACTIVE.iter().map(|s| s.as_str()).collect();
        let rows = pending_cash_payments::table
            .filter(pending_cash_payments::status.eq_any(active))
            .order((pending_cash_payments::created_at.desc(), pending_cash_payments::id.asc()))
            .load::<PendingCashPayment>(&mut conn)
            .await?;
        rows.into_iter().map(Reservation::try_from).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let mut conn = self.pool.get().await?;
        let row = diesel::update(
            pending_cash_payments::table
                .filter(pending_cash_payments::id.eq(id))
                .filter(pending_cash_payments::status.eq(from.as_str())),
        )
        .set((
            pending_cash_payments::status.eq(to.as_str()),
            pending_cash_payments::updated_at.eq(at),
        ))
        .get_result::<PendingCashPayment>(&mut conn)
        .await
        .optional()?;
        into_reservation(row)
    }

    async fn assign_code(
        &self,
        id: Uuid,
        from: ReservationStatus,
        code: &str,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<CodeAssignment> {
        let mut conn = self.pool.get().await?;
        let result = diesel::update(
            pending_cash_payments::table
                .filter(pending_cash_payments::id.eq(id))
                .filter(pending_cash_payments::status.eq(from.as_str())),
        )
        .set((
            pending_cash_payments::code.eq(Some(code)),
            pending_cash_payments::expires_at.eq(Some(expires_at)),
            pending_cash_payments::status.eq(ReservationStatus::CodeIssued.as_str()),
            pending_cash_payments::updated_at.eq(at),
        ))
        .get_result::<PendingCashPayment>(&mut conn)
        .await
        .optional();

        match result {
            Ok(Some(row)) => Ok(CodeAssignment::Assigned(row.try_into()?)),
            Ok(None) => Ok(CodeAssignment::StatusChanged),
            Err(e) if is_unique_violation(&e) => Ok(CodeAssignment::CodeTaken),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_cart(
        &self,
        id: Uuid,
        from: ReservationStatus,
        cart: &[CartLine],
        at: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let mut conn = self.pool.get().await?;
        let cart = serde_json::to_value(cart)?;
        let row = diesel::update(
            pending_cash_payments::table
                .filter(pending_cash_payments::id.eq(id))
                .filter(pending_cash_payments::status.eq(from.as_str())),
        )
        .set((
            pending_cash_payments::cart.eq(cart),
            pending_cash_payments::updated_at.eq(at),
        ))
        .get_result::<PendingCashPayment>(&mut conn)
        .await
        .optional()?;
        into_reservation(row)
    }

    async fn redeem(&self, code: &str, now: DateTime<Utc>) -> Result<RedemptionOutcome> {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let code = code.to_string();

        conn.transaction::<_, CashPaymentError, _>(|conn| {
            Box::pin(async move { workflow::redeem_within(conn, &code, now).await })
        })
        .await
    }

    async fn expire_stale(&self, now: DateTime<Utc>, pending_cutoff: Option<DateTime<Utc>>) -> Result<usize> {
        let mut conn = self.pool.get().await?;

        let mut expired = diesel::update(
            pending_cash_payments::table
                .filter(pending_cash_payments::status.eq(ReservationStatus::CodeIssued.as_str()))
                .filter(pending_cash_payments::expires_at.le(now)),
        )
        .set((
            pending_cash_payments::status.eq(ReservationStatus::Expired.as_str()),
            pending_cash_payments::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .await?;

        if let Some(cutoff) = pending_cutoff {
            expired += diesel::update(
                pending_cash_payments::table
                    .filter(pending_cash_payments::status.eq(ReservationStatus::Pending.as_str()))
                    .filter(pending_cash_payments::created_at.lt(cutoff)),
            )
            .set((
                pending_cash_payments::status.eq(ReservationStatus::Expired.as_str()),
                pending_cash_payments::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await?;
        }

        Ok(expired)
    }
}
