use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand_core::CryptoRngCore;
use sha2::Sha256;

use crate::error::WeftError;

type HmacSha256 = Hmac<Sha256>;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const TOKEN_IV_SIZE: usize = 16;
pub const TOKEN_HMAC_SIZE: usize = 32;
pub const TOKEN_OVERHEAD: usize = TOKEN_IV_SIZE + TOKEN_HMAC_SIZE;
const AES_BLOCK_SIZE: usize = 16;

enum TokenKey {
    // sign half ‖ enc half of the 32-byte key
    Aes128([u8; 16], [u8; 16]),
    // sign half ‖ enc half of the 64-byte key
    Aes256([u8; 32], [u8; 32]),
}

/// Authenticated symmetric envelope: `IV || AES-CBC(ct) || HMAC(IV || ct)`.
///
/// A 32-byte key selects AES-128-CBC, a 64-byte key AES-256-CBC; the first
/// half of the key signs, the second half encrypts. This is the Fernet
/// construction with the version and timestamp fields stripped, matching
/// the wire tokens used across the mesh.
pub struct Token {
    key: TokenKey,
}

impl Token {
    pub fn new(key: &[u8]) -> Result<Self, WeftError> {
        match key.len() {
            32 => {
                let mut sign = [0u8; 16];
                let mut enc = [0u8; 16];
                sign.copy_from_slice(&key[..16]);
                enc.copy_from_slice(&key[16..]);
                Ok(Self { key: TokenKey::Aes128(sign, enc) })
            }
            64 => {
                let mut sign = [0u8; 32];
                let mut enc = [0u8; 32];
                sign.copy_from_slice(&key[..32]);
                enc.copy_from_slice(&key[32..]);
                Ok(Self { key: TokenKey::Aes256(sign, enc) })
            }
            _ => Err(WeftError::InvalidArgument),
        }
    }

    fn sign_key(&self) -> &[u8] {
        match &self.key {
            TokenKey::Aes128(sign, _) => sign,
            TokenKey::Aes256(sign, _) => sign,
        }
    }

    pub fn encrypt<R: CryptoRngCore>(
        &self,
        mut rng: R,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, WeftError> {
        let mut iv = [0u8; TOKEN_IV_SIZE];
        rng.fill_bytes(&mut iv);

        let padded_len = (plaintext.len() / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE;
        let mut out = vec![0u8; TOKEN_IV_SIZE + padded_len + TOKEN_HMAC_SIZE];
        out[..TOKEN_IV_SIZE].copy_from_slice(&iv);

        let ciphertext_len = match &self.key {
            TokenKey::Aes128(_, enc) => Aes128CbcEnc::new(enc.into(), &iv.into())
                .encrypt_padded_b2b_mut::<Pkcs7>(plaintext, &mut out[TOKEN_IV_SIZE..])
                .map_err(|_| WeftError::CryptoError)?
                .len(),
            TokenKey::Aes256(_, enc) => Aes256CbcEnc::new(enc.into(), &iv.into())
                .encrypt_padded_b2b_mut::<Pkcs7>(plaintext, &mut out[TOKEN_IV_SIZE..])
                .map_err(|_| WeftError::CryptoError)?
                .len(),
        };

        let signed_len = TOKEN_IV_SIZE + ciphertext_len;
        let tag = self.hmac_tag(&out[..signed_len])?;
        out.truncate(signed_len);
        out.extend_from_slice(&tag);

        Ok(out)
    }

    pub fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>, WeftError> {
        if token.len() <= TOKEN_OVERHEAD {
            return Err(WeftError::InvalidArgument);
        }

        let signed_len = token.len() - TOKEN_HMAC_SIZE;

        let mut hmac = <HmacSha256 as Mac>::new_from_slice(self.sign_key())
            .map_err(|_| WeftError::CryptoError)?;
        hmac.update(&token[..signed_len]);
        hmac.verify_slice(&token[signed_len..]).map_err(|_| WeftError::IncorrectSignature)?;

        let iv: [u8; TOKEN_IV_SIZE] =
            token[..TOKEN_IV_SIZE].try_into().map_err(|_| WeftError::InvalidArgument)?;
        let ciphertext = &token[TOKEN_IV_SIZE..signed_len];

        let mut out = vec![0u8; ciphertext.len()];
        let plaintext_len = match &self.key {
            TokenKey::Aes128(_, enc) => Aes128CbcDec::new(enc.into(), &iv.into())
                .decrypt_padded_b2b_mut::<Pkcs7>(ciphertext, &mut out)
                .map_err(|_| WeftError::CryptoError)?
                .len(),
            TokenKey::Aes256(_, enc) => Aes256CbcDec::new(enc.into(), &iv.into())
                .decrypt_padded_b2b_mut::<Pkcs7>(ciphertext, &mut out)
                .map_err(|_| WeftError::CryptoError)?
                .len(),
        };

        out.truncate(plaintext_len);
        Ok(out)
    }

    fn hmac_tag(&self, signed: &[u8]) -> Result<[u8; TOKEN_HMAC_SIZE], WeftError> {
        let mut hmac = <HmacSha256 as Mac>::new_from_slice(self.sign_key())
            .map_err(|_| WeftError::CryptoError)?;
        hmac.update(signed);

        let mut tag = [0u8; TOKEN_HMAC_SIZE];
        tag.copy_from_slice(&hmac.finalize().into_bytes());
        Ok(tag)
    }
}
