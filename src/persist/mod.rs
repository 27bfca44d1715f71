//! Persistent records surviving a restart

mod record;
mod store;

pub use record::{UpdateRecord, KEY_PENDING_ACTION_ID, KEY_UPDATE_PENDING, RECORD_NAMESPACE};
pub use store::{FileRecordStore, RecordStore};
