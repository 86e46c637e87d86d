//! Cash-payment reservations: a customer reserves a cart, a cashier issues a
//! short-lived numeric code, and redeeming the code commits stock and records
//! the sale in one transaction.

pub mod api;
pub mod clock;
pub mod code;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod schema;
pub mod store;
pub mod sweeper;
pub mod workflow;

pub use error::{CashPaymentError, Result};
