//! Leadflow Notify - Notification Log
//!
//! An append-only log of user-facing events with three guarantees:
//!
//! - duplicates arriving inside a short window merge into the existing
//!   entry instead of stacking visually identical alerts;
//! - the log never exceeds a fixed size, dropping the oldest entries;
//! - entries survive reloads via `DurableStore`, with an age-based prune
//!   at load time.
//!
//! The UI layer reads `snapshot()`/`unread_count()` reactively; it never
//! mutates entries directly.

pub mod log;
pub mod notification;

pub use log::{LogOptions, NotificationLog};
pub use notification::Notification;
