pub mod error;
pub mod store;
pub mod types;

pub use error::SessionStoreError;
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore};
pub use types::{
    AllocatedAddress, RunControl, SessionId, SessionProgress, SessionRecord, SessionStatus,
    SessionUpdate,
};
