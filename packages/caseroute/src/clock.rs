use arc_swap::ArcSwap;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;

///
/// Source of `now` for every expiry the router computes or compares.
///
/// The store keeps millisecond precision, so every instant handed out is truncated to the millisecond.
/// `Manual` is shared between clones and moved explicitly.
///
#[derive(Clone, Debug, Default)]
pub enum Clock {
    #[default]
    System,
    Manual(Arc<ArcSwap<DateTime<Utc>>>),
}

impl Clock {
    pub fn manual(start: DateTime<Utc>) -> Self {
        Clock::Manual(Arc::new(ArcSwap::from_pointee(truncate(start))))
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => truncate(Utc::now()),
            Clock::Manual(instant) => **instant.load(),
        }
    }

    ///
    /// `now + duration`, saturating at the largest representable instant
    ///
    pub fn after(&self, duration: Duration) -> DateTime<Utc> {
        let now = self.now();

        let delta = i64::try_from(duration.as_millis())
            .ok()
            .and_then(TimeDelta::try_milliseconds);

        delta
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// No-op for the system clock
    pub fn set(&self, instant: DateTime<Utc>) {
        if let Clock::Manual(current) = self {
            current.store(Arc::new(truncate(instant)));
        }
    }

    /// No-op for the system clock
    pub fn advance(&self, duration: Duration) {
        if let Clock::Manual(_) = self {
            self.set(self.after(duration));
        }
    }
}

fn truncate(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_trunc(TimeDelta::milliseconds(1))
        .unwrap_or(instant)
}
