//! Wall-clock abstraction for time-dependent behavior.
//!
//! The disk cache compares entry timestamps against "now" to enforce its TTL.
//! Routing that read through a trait lets tests move time forward without
//! sleeping.

use chrono::{DateTime, Utc};

/// Trait for providing the current time.
///
/// # Example
///
/// ```
/// use ssage::clock::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let now = clock.now();
/// assert!(now.timestamp() > 0);
/// ```
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
