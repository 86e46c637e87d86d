//! Reservation persistence.
//!
//! Every mutating method is conditional on the status the caller last saw,
//! which is how per-reservation operations are serialized without locks
//! outside of redemption.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{CartLine, ReservationStatus};
use uuid::Uuid;

use crate::error::Result;
use crate::ledger::Catalog;
use crate::lifecycle::Reservation;
use crate::workflow::RedemptionOutcome;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Insertion {
    Created(Reservation),
    /// The user already holds a `PENDING`/`CODE_ISSUED` reservation.
    ActiveExists,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodeAssignment {
    Assigned(Reservation),
    /// Another live reservation holds the candidate code.
    CodeTaken,
    /// The reservation is no longer in the expected status.
    StatusChanged,
}

#[async_trait]
pub trait ReservationStore: Catalog + Send + Sync + 'static {
    async fn insert(&self, reservation: Reservation) -> Result<Insertion>;

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>>;

    async fn find_active_for_user(&self, user_id: i32) -> Result<Option<Reservation>>;

    /// Live holder of `code` if any, otherwise the most recent cancelled one.
    async fn find_by_code(&self, code: &str) -> Result<Option<Reservation>>;

    /// Active reservations, newest first.
    async fn list_active(&self) -> Result<Vec<Reservation>>;

    async fn transition(
        &self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Reservation>>;

    /// Sets `code`, `expires_at` and `CODE_ISSUED` if the reservation is still
    /// in `from` and no other live reservation holds `code`.
    async fn assign_code(
        &self,
        id: Uuid,
        from: ReservationStatus,
        code: &str,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<CodeAssignment>;

    async fn replace_cart(
        &self,
        id: Uuid,
        from: ReservationStatus,
        cart: &[CartLine],
        at: DateTime<Utc>,
    ) -> Result<Option<Reservation>>;

    /// Runs the redemption workflow for `code` as one atomic unit.
    async fn redeem(&self, code: &str, now: DateTime<Utc>) -> Result<RedemptionOutcome>;

    /// Moves lapsed `CODE_ISSUED` reservations, and `PENDING` ones created
    /// before `pending_cutoff`, to `EXPIRED`. Returns how many changed.
    async fn expire_stale(&self, now: DateTime<Utc>, pending_cutoff: Option<DateTime<Utc>>) -> Result<usize>;
}
