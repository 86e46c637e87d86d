use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub barcode: String,
    pub quantity: i32,
}

impl CartLine {
    pub fn new(barcode: impl Into<String>, quantity: i32) -> Self {
        Self {
            barcode: barcode.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    CodeIssued,
    Paid,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    pub const ACTIVE: [ReservationStatus; 2] = [ReservationStatus::Pending, ReservationStatus::CodeIssued];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::CodeIssued => "CODE_ISSUED",
            ReservationStatus::Paid => "PAID",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }

    /// Pre-redemption states. A user holds at most one reservation in these.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::CodeIssued)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised value {0:?}")]
pub struct ParseEnumError(pub String);

impl FromStr for ReservationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReservationStatus::Pending),
            "CODE_ISSUED" => Ok(ReservationStatus::CodeIssued),
            "PAID" => Ok(ReservationStatus::Paid),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            "EXPIRED" => Ok(ReservationStatus::Expired),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Customer,
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "customer" | "user" => Ok(Role::Customer),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

/// Caller identity as supplied by the upstream authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i32,
    pub role: Role,
}

impl Identity {
    pub fn customer(user_id: i32) -> Self {
        Self { user_id, role: Role::Customer }
    }

    pub fn admin(user_id: i32) -> Self {
        Self { user_id, role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can_act_for(&self, owner_id: i32) -> bool {
        self.is_admin() || self.user_id == owner_id
    }
}

/// Catalog row as seen by the cash-payment subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i32,
    pub barcode: String,
    pub name: String,
    pub price: BigDecimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLine {
    pub item_id: i32,
    pub barcode: String,
    pub quantity: i32,
    pub price_at_sale: BigDecimal,
}

impl SaleLine {
    pub fn line_total(&self) -> BigDecimal {
        &self.price_at_sale * BigDecimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub sale_id: Uuid,
    pub user_id: i32,
    pub lines: Vec<SaleLine>,
    pub total: BigDecimal,
    pub created_at: DateTime<Utc>,
}

impl SaleReceipt {
    pub fn new(sale_id: Uuid, user_id: i32, lines: Vec<SaleLine>, created_at: DateTime<Utc>) -> Self {
        let total = lines
            .iter()
            .fold(BigDecimal::zero(), |acc, line| acc + line.line_total());
        Self {
            sale_id,
            user_id,
            lines,
            total,
            created_at,
        }
    }
}
