//! Stock ledger adapter over the catalog's item rows.

use async_trait::async_trait;
use shared::{CartLine, CatalogItem, SaleLine};
use std::collections::BTreeMap;

use crate::error::{CashPaymentError, Result};

/// Read-only catalog lookups outside any transaction.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn lookup_item(&self, barcode: &str) -> Result<Option<CatalogItem>>;
}

/// Stock access inside an open unit of work.
#[async_trait]
pub trait StockLedger: Send {
    async fn lookup(&mut self, barcode: &str) -> Result<Option<CatalogItem>>;

    /// Decrements `item_id` by `quantity` only if that much is on hand.
    /// Returns the updated row, or `None` when stock was insufficient.
    async fn decrement(&mut self, item_id: i32, quantity: i32) -> Result<Option<CatalogItem>>;
}

/// Advisory availability check used when a cart is submitted or changed.
/// Duplicate barcodes are checked against their combined quantity.
pub async fn check_availability<C: Catalog + ?Sized>(catalog: &C, cart: &[CartLine]) -> Result<()> {
    let mut requested: BTreeMap<&str, i32> = BTreeMap::new();
    for line in cart {
        let total = requested.entry(line.barcode.as_str()).or_insert(0);
        *total = total.checked_add(line.quantity).ok_or_else(|| {
            CashPaymentError::Validation(format!("quantity for {} is too large", line.barcode))
        })?;
    }

    for (barcode, quantity) in requested {
        let item = catalog
            .lookup_item(barcode)
            .await?
            .ok_or_else(|| CashPaymentError::UnknownItem {
                barcode: barcode.to_string(),
            })?;
        if item.quantity < quantity {
            return Err(CashPaymentError::InsufficientStock {
                barcode: barcode.to_string(),
                requested: quantity,
                available: item.quantity,
            });
        }
    }
    Ok(())
}

/// Decrements stock for every line and resolves current prices.
///
/// Lines for the same barcode are merged, and rows are decremented in
/// ascending `item_id` order so that concurrent redemptions always lock item
/// rows in the same sequence. Must run inside the caller's transaction: on the
/// first short item the error is returned and the caller rolls back the
/// decrements already made.
pub async fn reserve_and_commit<L: StockLedger + ?Sized>(
    ledger: &mut L,
    lines: &[CartLine],
) -> Result<Vec<SaleLine>> {
    let mut requested: BTreeMap<&str, i32> = BTreeMap::new();
    for line in lines {
        let total = requested.entry(line.barcode.as_str()).or_insert(0);
        *total = total.checked_add(line.quantity).ok_or_else(|| {
            CashPaymentError::Validation(format!("quantity for {} is too large", line.barcode))
        })?;
    }

    let mut plan = Vec::with_capacity(requested.len());
    for (barcode, quantity) in requested {
        let item = ledger
            .lookup(barcode)
            .await?
            .ok_or_else(|| CashPaymentError::UnknownItem {
                barcode: barcode.to_string(),
            })?;
        plan.push((item.id, barcode, quantity));
    }
    plan.sort_by_key(|(item_id, _, _)| *item_id);

    let mut resolved = Vec::with_capacity(plan.len());
    for (item_id, barcode, quantity) in plan {
        match ledger.decrement(item_id, quantity).await? {
            Some(updated) => resolved.push(SaleLine {
                item_id: updated.id,
                barcode: updated.barcode,
                quantity,
                price_at_sale: updated.price,
            }),
            None => {
                let available = ledger.lookup(barcode).await?.map_or(0, |item| item.quantity);
                return Err(CashPaymentError::InsufficientStock {
                    barcode: barcode.to_string(),
                    requested: quantity,
                    available,
                });
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryState, MemoryStore};
    use bigdecimal::BigDecimal;

    fn item(id: i32, barcode: &str, price: &str, quantity: i32) -> CatalogItem {
        CatalogItem {
            id,
            barcode: barcode.into(),
            name: format!("item {barcode}"),
            price: price.parse().unwrap(),
            quantity,
        }
    }

    #[tokio::test]
    async fn availability_sums_duplicate_barcodes() {
        let store = MemoryStore::with_catalog([item(1, "A1", "10.00", 3)]);
        assert!(check_availability(&store, &[CartLine::new("A1", 2)]).await.is_ok());

        let err = check_availability(&store, &[CartLine::new("A1", 2), CartLine::new("A1", 2)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CashPaymentError::InsufficientStock { requested: 4, available: 3, .. }
        ));
    }

    #[tokio::test]
    async fn availability_reports_unknown_barcodes() {
        let store = MemoryStore::with_catalog([item(1, "A1", "10.00", 3)]);
        let err = check_availability(&store, &[CartLine::new("ZZ", 1)]).await.unwrap_err();
        assert!(matches!(err, CashPaymentError::UnknownItem { barcode } if barcode == "ZZ"));
    }

    #[tokio::test]
    async fn commit_resolves_current_prices_and_decrements() {
        let mut state = MemoryState::with_catalog([item(1, "A1", "10.00", 5), item(2, "B2", "2.50", 1)]);
        let lines = reserve_and_commit(&mut state, &[CartLine::new("A1", 2), CartLine::new("B2", 1)])
            .await
            .unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].item_id, 1);
        assert_eq!(lines[0].price_at_sale, "10.00".parse::<BigDecimal>().unwrap());
        assert_eq!(state.item("A1").unwrap().quantity, 3);
        assert_eq!(state.item("B2").unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn commit_stops_at_first_short_line() {
        let mut state = MemoryState::with_catalog([item(1, "A1", "10.00", 5), item(2, "B2", "2.50", 0)]);
        let err = reserve_and_commit(&mut state, &[CartLine::new("A1", 2), CartLine::new("B2", 1)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CashPaymentError::InsufficientStock { ref barcode, requested: 1, available: 0 } if barcode == "B2"
        ));
    }

    #[tokio::test]
    async fn commit_merges_duplicates_and_decrements_in_item_order() {
        let mut state = MemoryState::with_catalog([item(1, "A1", "10.00", 5), item(2, "B2", "2.50", 4)]);
        let lines = reserve_and_commit(
            &mut state,
            &[CartLine::new("B2", 1), CartLine::new("A1", 2), CartLine::new("B2", 2)],
        )
        .await
        .unwrap();

        let summary: Vec<_> = lines.iter().map(|l| (l.item_id, l.quantity)).collect();
        assert_eq!(summary, vec![(1, 2), (2, 3)]);
        assert_eq!(state.item("A1").unwrap().quantity, 3);
        assert_eq!(state.item("B2").unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn shortage_reports_the_quantity_actually_on_hand() {
        // Two lines for A1 that fit separately but not together.
        let mut state = MemoryState::with_catalog([item(1, "A1", "10.00", 3)]);
        let err = reserve_and_commit(&mut state, &[CartLine::new("A1", 2), CartLine::new("A1", 2)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CashPaymentError::InsufficientStock { requested: 4, available: 3, .. }
        ));
    }
}
