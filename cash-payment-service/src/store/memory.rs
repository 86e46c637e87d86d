//! In-process store for tests and local runs without PostgreSQL.
//!
//! A single async mutex guards the whole state. Redemption runs against a
//! scratch copy that replaces the live state only when the workflow succeeds,
//! which gives the same all-or-nothing behaviour as a database transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{CartLine, CatalogItem, ReservationStatus, SaleLine};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CodeAssignment, Insertion, ReservationStore};
use crate::error::Result;
use crate::ledger::{Catalog, StockLedger};
use crate::lifecycle::Reservation;
use crate::workflow::{self, RedemptionOutcome, RedemptionTx};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSale {
    pub sale_id: Uuid,
    pub user_id: i32,
    pub date: DateTime<Utc>,
    pub lines: Vec<SaleLine>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    items: BTreeMap<String, CatalogItem>,
    reservations: HashMap<Uuid, Reservation>,
    sales: Vec<RecordedSale>,
}

impl MemoryState {
    pub fn with_catalog(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        Self {
            items: items.into_iter().map(|item| (item.barcode.clone(), item)).collect(),
            ..Self::default()
        }
    }

    pub fn item(&self, barcode: &str) -> Option<&CatalogItem> {
        self.items.get(barcode)
    }

    fn live_holder(&self, code: &str) -> Option<&Reservation> {
        self.reservations
            .values()
            .find(|r| r.status != ReservationStatus::Cancelled && r.code.as_deref() == Some(code))
    }

    fn find_by_code(&self, code: &str) -> Option<Reservation> {
        self.live_holder(code)
            .or_else(|| {
                self.reservations
                    .values()
                    .filter(|r| r.code.as_deref() == Some(code))
                    .max_by_key(|r| r.updated_at)
            })
            .cloned()
    }

    fn transition(
        &mut self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Option<Reservation> {
        let reservation = self.reservations.get_mut(&id).filter(|r| r.status == from)?;
        reservation.status = to;
        reservation.updated_at = at;
        Some(reservation.clone())
    }
}

#[async_trait]
impl StockLedger for MemoryState {
    async fn lookup(&mut self, barcode: &str) -> Result<Option<CatalogItem>> {
        Ok(self.items.get(barcode).cloned())
    }

    async fn decrement(&mut self, item_id: i32, quantity: i32) -> Result<Option<CatalogItem>> {
        let updated = self
            .items
            .values_mut()
            .find(|item| item.id == item_id && item.quantity >= quantity)
            .map(|item| {
                item.quantity -= quantity;
                item.clone()
            });
        Ok(updated)
    }
}

#[async_trait]
impl RedemptionTx for MemoryState {
    async fn lock_by_code(&mut self, code: &str) -> Result<Option<Reservation>> {
        Ok(self.find_by_code(code))
    }

    async fn set_status(
        &mut self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.transition(id, from, to, at).is_some())
    }

    async fn record_sale(&mut self, user_id: i32, lines: &[SaleLine], at: DateTime<Utc>) -> Result<Uuid> {
        let sale_id = Uuid::new_v4();
        self.sales.push(RecordedSale {
            sale_id,
            user_id,
            date: at,
            lines: lines.to_vec(),
        });
        Ok(sale_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        Self {
            state: Mutex::new(MemoryState::with_catalog(items)),
        }
    }

    pub async fn upsert_item(&self, item: CatalogItem) {
        self.state.lock().await.items.insert(item.barcode.clone(), item);
    }

    pub async fn item(&self, barcode: &str) -> Option<CatalogItem> {
        self.state.lock().await.item(barcode).cloned()
    }

    pub async fn sales(&self) -> Vec<RecordedSale> {
        self.state.lock().await.sales.clone()
    }

    pub async fn reservations(&self) -> Vec<Reservation> {
        self.state.lock().await.reservations.values().cloned().collect()
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn lookup_item(&self, barcode: &str) -> Result<Option<CatalogItem>> {
        Ok(self.item(barcode).await)
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn insert(&self, reservation: Reservation) -> Result<Insertion> {
        let mut state = self.state.lock().await;
        let blocked = state
            .reservations
            .values()
            .any(|r| r.user_id == reservation.user_id && r.is_active());
        if blocked {
            return Ok(Insertion::ActiveExists);
        }
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(Insertion::Created(reservation))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>> {
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn find_active_for_user(&self, user_id: i32) -> Result<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .values()
            .find(|r| r.user_id == user_id && r.is_active())
            .cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Reservation>> {
        Ok(self.state.lock().await.find_by_code(code))
    }

    async fn list_active(&self) -> Result<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut active: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(active)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        Ok(self.state.lock().await.transition(id, from, to, at))
    }

    async fn assign_code(
        &self,
        id: Uuid,
        from: ReservationStatus,
        code: &str,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<CodeAssignment> {
        let mut state = self.state.lock().await;
        let in_expected_status = state
            .reservations
            .get(&id)
            .map_or(false, |r| r.status == from);
        if !in_expected_status {
            return Ok(CodeAssignment::StatusChanged);
        }
        if state.live_holder(code).map_or(false, |holder| holder.id != id) {
            return Ok(CodeAssignment::CodeTaken);
        }

        let Some(reservation) = state.reservations.get_mut(&id) else {
            return Ok(CodeAssignment::StatusChanged);
        };
        reservation.code = Some(code.to_string());
        reservation.expires_at = Some(expires_at);
        reservation.status = ReservationStatus::CodeIssued;
        reservation.updated_at = at;
        Ok(CodeAssignment::Assigned(reservation.clone()))
    }

    async fn replace_cart(
        &self,
        id: Uuid,
        from: ReservationStatus,
        cart: &[CartLine],
        at: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let mut state = self.state.lock().await;
        let Some(reservation) = state.reservations.get_mut(&id).filter(|r| r.status == from) else {
            return Ok(None);
        };
        reservation.cart = cart.to_vec();
        reservation.updated_at = at;
        Ok(Some(reservation.clone()))
    }

    async fn redeem(&self, code: &str, now: DateTime<Utc>) -> Result<RedemptionOutcome> {
        let mut state = self.state.lock().await;
        let mut scratch = state.clone();
        let outcome = workflow::redeem_within(&mut scratch, code, now).await?;
        *state = scratch;
        Ok(outcome)
    }

    async fn expire_stale(&self, now: DateTime<Utc>, pending_cutoff: Option<DateTime<Utc>>) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for reservation in state.reservations.values_mut() {
            let lapsed = reservation.code_lapsed(now);
            let stale_pending = reservation.status == ReservationStatus::Pending
                && pending_cutoff.map_or(false, |cutoff| reservation.created_at < cutoff);
            if lapsed || stale_pending {
                reservation.status = ReservationStatus::Expired;
                reservation.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }
}
