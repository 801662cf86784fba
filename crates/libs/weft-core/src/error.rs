#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum WeftError {
    OutOfMemory,
    InvalidArgument,
    IncorrectHash,
    IncorrectSignature,
    CryptoError,
    PacketError,
    ConnectionError,
}
