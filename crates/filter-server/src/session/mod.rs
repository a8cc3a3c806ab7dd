//! Session tracking

mod reaper;
mod table;

pub use reaper::{reap_sessions, ReapReport, GRACE_WINDOW};
pub use table::{Slot, SlotError, SlotTable};
