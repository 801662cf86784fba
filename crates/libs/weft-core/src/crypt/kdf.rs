use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::WeftError;

/// HKDF-SHA256 with empty info, byte-exact with the reference vectors.
pub fn derive_key(length: usize, ikm: &[u8], salt: Option<&[u8]>) -> Result<Vec<u8>, WeftError> {
    if length == 0 || ikm.is_empty() {
        return Err(WeftError::InvalidArgument);
    }

    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = vec![0u8; length];
    hkdf.expand(&[], &mut okm).map_err(|_| WeftError::InvalidArgument)?;

    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_length_is_honored() {
        let short = derive_key(16, b"input keying material", Some(b"salt")).expect("derivable");
        let long = derive_key(64, b"input keying material", Some(b"salt")).expect("derivable");
        assert_eq!(short.len(), 16);
        assert_eq!(long.len(), 64);
        assert_eq!(&long[..16], &short[..]);
    }

    #[test]
    fn rejects_empty_inputs() {
        assert!(derive_key(0, b"ikm", None).is_err());
        assert!(derive_key(32, b"", None).is_err());
    }
}
