#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o failure: {0}")]
    Io(String),

    #[error("encode failure: {0}")]
    Encode(String),

    #[error("decode failure: {0}")]
    Decode(String),

    #[error("message not found")]
    NotFound,

    #[error("conversation pool is full")]
    ConversationPoolFull,

    #[error("message pool for this conversation is full")]
    MessagePoolFull,

    #[error("file name exceeds the {0}-character limit")]
    NameTooLong(usize),
}
