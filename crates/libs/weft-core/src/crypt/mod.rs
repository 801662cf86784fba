pub mod kdf;
pub mod token;

pub use kdf::derive_key;
pub use token::Token;
