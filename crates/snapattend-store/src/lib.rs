//! snapattend-store — SQLite roster, enrollment descriptors and attendance log.

mod codec;
mod store;

pub use store::{AttendanceRecord, AttendanceSummary, SqliteStore, StoreError};
