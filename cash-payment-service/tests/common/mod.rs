#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cash_payment_service::clock::{Clock, ManualClock};
use cash_payment_service::config::ServiceConfig;
use cash_payment_service::handlers::CashPaymentHandler;
use cash_payment_service::lifecycle::Reservation;
use cash_payment_service::store::MemoryStore;
use shared::{CartLine, CatalogItem, Identity};
use uuid::Uuid;

pub const ADMIN: Identity = Identity {
    user_id: 1,
    role: shared::Role::Admin,
};

pub fn item(id: i32, barcode: &str, price: &str, quantity: i32) -> CatalogItem {
    CatalogItem {
        id,
        barcode: barcode.to_string(),
        name: format!("item {barcode}"),
        price: price.parse().unwrap(),
        quantity,
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub handler: CashPaymentHandler<MemoryStore>,
}

impl Harness {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self::with_config(items, ServiceConfig::default())
    }

    pub fn with_config(items: Vec<CatalogItem>, config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::with_catalog(items));
        let clock = Arc::new(ManualClock::default());
        let shared_clock: Arc<dyn Clock> = clock.clone();
        let handler = CashPaymentHandler::new(store.clone(), shared_clock, config);
        Self { store, clock, handler }
    }

    pub async fn reserve(&self, user_id: i32, cart: Vec<CartLine>) -> Reservation {
        self.handler
            .create_reservation(&Identity::customer(user_id), cart)
            .await
            .unwrap()
            .into_reservation()
    }

    pub async fn reserve_with_code(&self, user_id: i32, cart: Vec<CartLine>) -> (Uuid, String) {
        let reservation = self.reserve(user_id, cart).await;
        let issued = self.handler.issue_code(&ADMIN, reservation.id).await.unwrap();
        (issued.id, issued.code.unwrap())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn stock(&self, barcode: &str) -> i32 {
        self.store.item(barcode).await.unwrap().quantity
    }
}
