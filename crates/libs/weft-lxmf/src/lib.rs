//! LXMF message persistence: the packed wire codec, an abstract
//! filesystem, and the conversation-indexed message store.

mod error;
pub mod fs;
pub mod message;
pub mod store;

pub use error::StoreError;
pub use fs::{FileSystem, StdFs};
pub use message::{LxMessage, MessageState};
pub use store::{MessageMetadata, MessageStore, StoreConfig};
