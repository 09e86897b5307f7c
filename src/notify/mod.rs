//! Reminder scheduling and its synchronization with the server.

pub mod driver;
pub mod scheduler;
pub mod sync;
pub mod verify;

#[cfg(test)]
mod testing;

pub use driver::{DriverHandle, Lifecycle, SyncDriver};
pub use scheduler::{LogPresenter, NotificationScheduler, TimerScheduler};
pub use sync::{NotificationSource, NotificationSync, SyncOutcome, SyncStateStore, SyncTrigger};
pub use verify::PreFireVerifier;
