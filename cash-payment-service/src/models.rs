use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use shared::*;

use crate::error::CashPaymentError;
use crate::lifecycle::Reservation;

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::items)]
pub struct Item {
    pub id: i32,
    pub barcode: String,
    pub name: String,
    pub price: bigdecimal::BigDecimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::pending_cash_payments)]
pub struct PendingCashPayment {
    pub id: Uuid,
    pub user_id: i32,
    pub code: Option<String>,
    pub cart: serde_json::Value,
    pub status: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::pending_cash_payments)]
pub struct NewPendingCashPayment {
    pub id: Uuid,
    pub user_id: i32,
    pub cart: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::sales_transactions)]
pub struct NewSalesTransaction {
    pub id: Uuid,
    pub user_id: i32,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::sales_transaction_items)]
pub struct NewSalesTransactionItem {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub item_id: i32,
    pub quantity: i32,
    pub price_at_sale: bigdecimal::BigDecimal,
}

impl From<Item> for CatalogItem {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            barcode: item.barcode,
            name: item.name,
            price: item.price,
            quantity: item.quantity,
        }
    }
}

impl TryFrom<PendingCashPayment> for Reservation {
    type Error = CashPaymentError;

    fn try_from(row: PendingCashPayment) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<ReservationStatus>()
            .map_err(|e| CashPaymentError::Corrupt(format!("reservation {} status: {}", row.id, e)))?;
        let cart: Vec<CartLine> = serde_json::from_value(row.cart)?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            cart,
            code: row.code,
            status,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<&Reservation> for NewPendingCashPayment {
    type Error = CashPaymentError;

    fn try_from(reservation: &Reservation) -> Result<Self, Self::Error> {
        Ok(Self {
            id: reservation.id,
            user_id: reservation.user_id,
            cart: serde_json::to_value(&reservation.cart)?,
            status: reservation.status.as_str().to_string(),
            created_at: reservation.created_at,
            updated_at: reservation.updated_at,
        })
    }
}

impl NewSalesTransactionItem {
    pub fn from_line(transaction_id: Uuid, line: &SaleLine) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            item_id: line.item_id,
            quantity: line.quantity,
            price_at_sale: line.price_at_sale.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, cart: serde_json::Value) -> PendingCashPayment {
        let now = Utc::now();
        PendingCashPayment {
            id: Uuid::new_v4(),
            user_id: 7,
            code: Some("123456".into()),
            cart,
            status: status.into(),
            expires_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn row_converts_to_reservation() {
        let reservation = Reservation::try_from(row(
            "CODE_ISSUED",
            serde_json::json!([{"barcode": "A1", "quantity": 2}]),
        ))
        .unwrap();
        assert_eq!(reservation.status, ReservationStatus::CodeIssued);
        assert_eq!(reservation.cart, vec![CartLine::new("A1", 2)]);
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let err = Reservation::try_from(row("REFUNDED", serde_json::json!([]))).unwrap_err();
        assert!(matches!(err, CashPaymentError::Corrupt(_)));
    }

    #[test]
    fn malformed_cart_is_rejected() {
        let err = Reservation::try_from(row("PENDING", serde_json::json!({"barcode": "A1"}))).unwrap_err();
        assert!(matches!(err, CashPaymentError::Serialization(_)));
    }
}
