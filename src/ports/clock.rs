//! Time source port.
//!
//! Lifecycle decisions ("has this period elapsed?") depend on the current
//! time, so handlers read it through this port instead of the system clock.

use crate::domain::foundation::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}
