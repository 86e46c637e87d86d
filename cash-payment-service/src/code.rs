//! Random fixed-width numeric cash codes.
//!
//! Uniqueness is left to the store's unique index: a candidate that collides
//! is discarded and a fresh one drawn, up to `max_attempts` times.

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{CashPaymentError, Result};
use crate::lifecycle::Reservation;
use crate::store::{CodeAssignment, ReservationStore};

pub const MAX_CODE_WIDTH: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeGenerator {
    width: u32,
    allow_leading_zero: bool,
    max_attempts: u32,
}

impl CodeGenerator {
    pub fn new(width: u32, allow_leading_zero: bool, max_attempts: u32) -> Self {
        Self {
            width: width.clamp(1, MAX_CODE_WIDTH),
            allow_leading_zero,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    fn bounds(&self) -> (u32, u32) {
        let high = 10u32.pow(self.width) - 1;
        let low = if self.allow_leading_zero { 0 } else { 10u32.pow(self.width - 1) };
        (low, high)
    }

    /// Number of distinct codes this generator can produce.
    pub fn space(&self) -> u32 {
        let (low, high) = self.bounds();
        high - low + 1
    }

    pub fn candidate(&self) -> String {
        let (low, high) = self.bounds();
        let value = rand::thread_rng().gen_range(low..=high);
        format!("{:0width$}", value, width = self.width as usize)
    }

    /// Whether `code` has the shape this generator produces.
    pub fn is_well_formed(&self, code: &str) -> bool {
        code.len() == self.width as usize
            && code.bytes().all(|b| b.is_ascii_digit())
            && (self.allow_leading_zero || !code.starts_with('0'))
    }

    /// Assigns a fresh unique code to `reservation`, expecting it to still be
    /// in the status it was read with.
    pub async fn issue<S: ReservationStore + ?Sized>(
        &self,
        store: &S,
        reservation: &Reservation,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.candidate();
            match store
                .assign_code(reservation.id, reservation.status, &candidate, expires_at, now)
                .await?
            {
                CodeAssignment::Assigned(updated) => return Ok(updated),
                CodeAssignment::CodeTaken => {
                    debug!(reservation_id = %reservation.id, attempt, "Cash code collision, drawing again");
                }
                CodeAssignment::StatusChanged => {
                    let current = store
                        .get(reservation.id)
                        .await?
                        .ok_or(CashPaymentError::NotFound("reservation"))?;
                    return Err(CashPaymentError::InvalidState {
                        action: "issue a code for",
                        status: current.status,
                    });
                }
            }
        }

        warn!(
            reservation_id = %reservation.id,
            attempts = self.max_attempts,
            space = self.space(),
            "Cash code space exhausted"
        );
        Err(CashPaymentError::CodeSpaceExhausted {
            attempts: self.max_attempts,
        })
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(6, false, 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Insertion, MemoryStore};
    use chrono::Duration;
    use shared::{CartLine, ReservationStatus};

    #[test]
    fn six_digit_codes_never_start_with_zero() {
        let generator = CodeGenerator::default();
        assert_eq!(generator.space(), 900_000);
        for _ in 0..1_000 {
            let code = generator.candidate();
            assert_eq!(code.len(), 6);
            assert!(generator.is_well_formed(&code), "bad code {code}");
        }
    }

    #[test]
    fn zero_padded_codes_keep_their_width() {
        let generator = CodeGenerator::new(4, true, 4);
        assert_eq!(generator.space(), 10_000);
        for _ in 0..1_000 {
            assert_eq!(generator.candidate().len(), 4);
        }
        assert!(generator.is_well_formed("0042"));
    }

    #[test]
    fn malformed_codes_are_recognised() {
        let generator = CodeGenerator::default();
        assert!(!generator.is_well_formed("12345"));
        assert!(!generator.is_well_formed("12345a"));
        assert!(!generator.is_well_formed("012345"));
        assert!(generator.is_well_formed("123456"));
    }

    async fn pending(store: &MemoryStore, user_id: i32) -> Reservation {
        let reservation = Reservation::new(user_id, vec![CartLine::new("A1", 1)], Utc::now());
        match store.insert(reservation).await.unwrap() {
            Insertion::Created(r) => r,
            Insertion::ActiveExists => panic!("user {user_id} already active"),
        }
    }

    #[tokio::test]
    async fn collisions_are_retried_until_a_free_code_is_found() {
        // Single-digit space: 1..=9. Occupy eight of them.
        let generator = CodeGenerator::new(1, false, 500);
        let store = MemoryStore::new();
        let now = Utc::now();
        let expires = now + Duration::minutes(10);
        for user_id in 1..=8 {
            let r = pending(&store, user_id).await;
            let code = user_id.to_string();
            store
                .assign_code(r.id, ReservationStatus::Pending, &code, expires, now)
                .await
                .unwrap();
        }

        let last = pending(&store, 9).await;
        let issued = generator.issue(&store, &last, expires, now).await.unwrap();
        assert_eq!(issued.code.as_deref(), Some("9"));
        assert_eq!(issued.status, ReservationStatus::CodeIssued);
    }

    #[tokio::test]
    async fn exhausted_space_is_fatal_and_bounded() {
        let generator = CodeGenerator::new(1, false, 5);
        let store = MemoryStore::new();
        let now = Utc::now();
        let expires = now + Duration::minutes(10);
        for user_id in 1..=9 {
            let r = pending(&store, user_id).await;
            let code = user_id.to_string();
            store
                .assign_code(r.id, ReservationStatus::Pending, &code, expires, now)
                .await
                .unwrap();
        }

        let extra = pending(&store, 10).await;
        let err = generator.issue(&store, &extra, expires, now).await.unwrap_err();
        assert!(matches!(err, CashPaymentError::CodeSpaceExhausted { attempts: 5 }));
        let unchanged = store.get(extra.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, ReservationStatus::Pending);
        assert!(unchanged.code.is_none());
    }

    #[tokio::test]
    async fn concurrent_transition_surfaces_invalid_state() {
        let generator = CodeGenerator::default();
        let store = MemoryStore::new();
        let now = Utc::now();
        let r = pending(&store, 7).await;
        store
            .transition(r.id, ReservationStatus::Pending, ReservationStatus::Cancelled, now)
            .await
            .unwrap();

        let err = generator
            .issue(&store, &r, now + Duration::minutes(10), now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CashPaymentError::InvalidState { status: ReservationStatus::Cancelled, .. }
        ));
    }
}
