mod record;
mod store;

// Attempt log rows and their vocabulary
pub use record::{DeliveryKey, InboxRecord, InboxState, InboxStatus, NewInboxRecord};

// Store
pub use store::InboxStore;
