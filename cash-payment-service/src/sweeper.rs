use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{error, info};

use crate::clock::Clock;
use crate::error::Result;
use crate::store::ReservationStore;

/// Periodically moves lapsed reservations to `EXPIRED`.
///
/// Expiry is already enforced lazily at redemption and lookup; this only
/// keeps the table tidy and frees users stuck behind an abandoned request.
pub struct StaleReservationSweeper<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    pending_max_age: Option<chrono::Duration>,
}

impl<S: ReservationStore + ?Sized> StaleReservationSweeper<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        pending_max_age: Option<chrono::Duration>,
    ) -> Self {
        Self { store, clock, interval, pending_max_age }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Error sweeping stale cash reservations");
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<usize> {
        let now = self.clock.now();
        let pending_cutoff = self.pending_max_age.map(|age| now - age);
        let expired = self.store.expire_stale(now, pending_cutoff).await?;
        if expired > 0 {
            info!(expired, "Expired stale cash reservations");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lifecycle::Reservation;
    use crate::store::{Insertion, MemoryStore};
    use shared::{CartLine, ReservationStatus};

    #[tokio::test]
    async fn sweep_expires_lapsed_codes_and_old_pending() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        let start = clock.now();

        let issued = match store
            .insert(Reservation::new(1, vec![CartLine::new("A1", 1)], start))
            .await
            .unwrap()
        {
            Insertion::Created(r) => r,
            Insertion::ActiveExists => unreachable!(),
        };
        store
            .assign_code(
                issued.id,
                ReservationStatus::Pending,
                "123456",
                start + chrono::Duration::minutes(10),
                start,
            )
            .await
            .unwrap();
        let waiting = match store
            .insert(Reservation::new(2, vec![CartLine::new("A1", 1)], start))
            .await
            .unwrap()
        {
            Insertion::Created(r) => r,
            Insertion::ActiveExists => unreachable!(),
        };

        let sweeper = StaleReservationSweeper::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(60),
            Some(chrono::Duration::hours(1)),
        );

        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

        clock.advance(chrono::Duration::minutes(10));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        let expired = store.get(issued.id).await.unwrap().unwrap();
        assert_eq!(expired.status, ReservationStatus::Expired);
        let still_pending = store.get(waiting.id).await.unwrap().unwrap();
        assert_eq!(still_pending.status, ReservationStatus::Pending);

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        let abandoned = store.get(waiting.id).await.unwrap().unwrap();
        assert_eq!(abandoned.status, ReservationStatus::Expired);
    }
}
