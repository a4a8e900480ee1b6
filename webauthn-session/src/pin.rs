use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cosey::{EcdhEsHkdf256PublicKey, PublicKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey as P256PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use tracing::{error, warn};
use zeroize::Zeroizing;

use crate::proto::ctap2::Ctap2PinUvAuthProtocol;
use crate::webauthn::error::{Error, PlatformError, ProtocolError};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const AES_BLOCK_SIZE: usize = 16;
const PIN_MIN_CODE_POINTS: usize = 4;
const PIN_MAX_BYTES: usize = 63;

/// Fixed platform key-agreement key, so that tests can predict every ClientPIN request.
#[cfg(test)]
pub(crate) const TEST_PLATFORM_KEY: [u8; 32] = [
    0xef, 0x61, 0x42, 0x23, 0xf3, 0xc4, 0xc4, 0x5c, 0xa9, 0xc7, 0xa1, 0xbc, 0x91, 0x7d, 0x70, 0x96,
    0xde, 0x91, 0xda, 0x43, 0x11, 0x6a, 0x48, 0xb1, 0xfe, 0x66, 0xeb, 0x30, 0x68, 0xf1, 0xa0, 0xa0,
];

pub trait PinUvAuthProtocol: Send + Sync {
    fn version(&self) -> Ctap2PinUvAuthProtocol;

    /// Generates an ephemeral platform key, and derives the shared secret with the
    /// authenticator's key agreement key. Returns the platform public key and the secret.
    fn encapsulate(&self, peer_public_key: &PublicKey) -> Result<(PublicKey, Vec<u8>), Error>;

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error>;

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error>;

    fn authenticate(&self, key: &[u8], message: &[u8]) -> Result<Vec<u8>, Error>;
}

impl Ctap2PinUvAuthProtocol {
    pub fn create_protocol_object(&self) -> Box<dyn PinUvAuthProtocol> {
        match self {
            Ctap2PinUvAuthProtocol::One => Box::new(PinUvAuthProtocolOne::new()),
            Ctap2PinUvAuthProtocol::Two => Box::new(PinUvAuthProtocolTwo::new()),
        }
    }
}

#[derive(Debug, Default)]
pub struct PinUvAuthProtocolOne;

impl PinUvAuthProtocolOne {
    pub fn new() -> Self {
        Self
    }
}

impl PinUvAuthProtocol for PinUvAuthProtocolOne {
    fn version(&self) -> Ctap2PinUvAuthProtocol {
        Ctap2PinUvAuthProtocol::One
    }

    fn encapsulate(&self, peer_public_key: &PublicKey) -> Result<(PublicKey, Vec<u8>), Error> {
        let (public_key, z) = ecdh(peer_public_key)?;
        Ok((public_key, Sha256::digest(z.as_slice()).to_vec()))
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        aes256_cbc_encrypt(key, &[0u8; AES_BLOCK_SIZE], plaintext)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        aes256_cbc_decrypt(key, &[0u8; AES_BLOCK_SIZE], ciphertext)
    }

    fn authenticate(&self, key: &[u8], message: &[u8]) -> Result<Vec<u8>, Error> {
        let mut signature = hmac_sha256(key, message)?;
        signature.truncate(16);
        Ok(signature)
    }
}

#[derive(Debug, Default)]
pub struct PinUvAuthProtocolTwo;

impl PinUvAuthProtocolTwo {
    pub fn new() -> Self {
        Self
    }

    fn hmac_key(key: &[u8]) -> &[u8] {
        // Shared secrets are HMAC key || AES key, tokens are used as-is.
        &key[..key.len().min(32)]
    }

    fn aes_key(key: &[u8]) -> Result<&[u8], Error> {
        match key.len() {
            64 => Ok(&key[32..]),
            32 => Ok(key),
            len => {
                error!(len, "Invalid key length for PIN/UV auth protocol two");
                Err(PlatformError::Crypto.into())
            }
        }
    }
}

impl PinUvAuthProtocol for PinUvAuthProtocolTwo {
    fn version(&self) -> Ctap2PinUvAuthProtocol {
        Ctap2PinUvAuthProtocol::Two
    }

    fn encapsulate(&self, peer_public_key: &PublicKey) -> Result<(PublicKey, Vec<u8>), Error> {
        let (public_key, z) = ecdh(peer_public_key)?;
        let salt = [0u8; 32];
        let mut shared_secret = hkdf_sha256(Some(&salt), z.as_slice(), b"CTAP2 HMAC key", 32)?;
        shared_secret.extend(hkdf_sha256(
            Some(&salt),
            z.as_slice(),
            b"CTAP2 AES key",
            32,
        )?);
        Ok((public_key, shared_secret))
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let iv: [u8; AES_BLOCK_SIZE] = rand::random();
        let mut ciphertext = iv.to_vec();
        ciphertext.extend(aes256_cbc_encrypt(Self::aes_key(key)?, &iv, plaintext)?);
        Ok(ciphertext)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < AES_BLOCK_SIZE {
            warn!(len = ciphertext.len(), "Ciphertext shorter than IV");
            return Err(PlatformError::Crypto.into());
        }
        let (iv, data) = ciphertext.split_at(AES_BLOCK_SIZE);
        aes256_cbc_decrypt(Self::aes_key(key)?, iv, data)
    }

    fn authenticate(&self, key: &[u8], message: &[u8]) -> Result<Vec<u8>, Error> {
        hmac_sha256(Self::hmac_key(key), message)
    }
}

/// LEFT(SHA-256(pin), 16)
pub fn pin_hash(pin: &[u8]) -> Vec<u8> {
    let mut hash = Sha256::digest(pin).to_vec();
    hash.truncate(16);
    hash
}

/// Checks the PIN against the minimum and maximum PIN length.
pub fn check_pin_policy(pin: &str) -> Result<(), Error> {
    if pin.chars().count() < PIN_MIN_CODE_POINTS {
        return Err(PlatformError::PinPolicy("PIN too short").into());
    }
    if pin.len() > PIN_MAX_BYTES {
        return Err(PlatformError::PinPolicy("PIN too long").into());
    }
    Ok(())
}

pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| PlatformError::Crypto)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn hkdf_sha256(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Vec<u8>, Error> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|_| PlatformError::Crypto)?;
    Ok(okm)
}

fn aes256_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    if plaintext.len() % AES_BLOCK_SIZE != 0 {
        warn!(len = plaintext.len(), "Plaintext is not a multiple of the block size");
        return Err(PlatformError::Crypto.into());
    }
    let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| PlatformError::Crypto)?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(plaintext))
}

fn aes256_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    if ciphertext.len() % AES_BLOCK_SIZE != 0 {
        warn!(len = ciphertext.len(), "Ciphertext is not a multiple of the block size");
        return Err(PlatformError::Crypto.into());
    }
    let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| PlatformError::Crypto)?;
    cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| PlatformError::Crypto.into())
}

fn platform_key() -> Result<SecretKey, Error> {
    #[cfg(test)]
    let key = SecretKey::from_slice(&TEST_PLATFORM_KEY).map_err(|_| PlatformError::Crypto)?;
    #[cfg(not(test))]
    let key = SecretKey::random(&mut rand::rngs::OsRng);
    Ok(key)
}

/// Returns the platform public key and the raw ECDH x-coordinate.
fn ecdh(peer_public_key: &PublicKey) -> Result<(PublicKey, Zeroizing<Vec<u8>>), Error> {
    let (x, y) = match peer_public_key {
        PublicKey::EcdhEsHkdf256Key(key) => (&key.x, &key.y),
        PublicKey::P256Key(key) => (&key.x, &key.y),
        _ => {
            warn!("Key agreement key is not a P-256 key");
            return Err(ProtocolError::InvalidKeyAgreement.into());
        }
    };
    let mut sec1 = vec![0x04];
    sec1.extend_from_slice(x);
    sec1.extend_from_slice(y);
    let peer = P256PublicKey::from_sec1_bytes(&sec1).map_err(|_| {
        warn!("Key agreement key is not on the curve");
        ProtocolError::InvalidKeyAgreement
    })?;

    let secret = platform_key()?;
    let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    let z = Zeroizing::new(shared.raw_secret_bytes().to_vec());

    let point = secret.public_key().to_encoded_point(false);
    let (Some(px), Some(py)) = (point.x(), point.y()) else {
        return Err(PlatformError::Crypto.into());
    };
    let public_key = PublicKey::EcdhEsHkdf256Key(EcdhEsHkdf256PublicKey {
        x: cosey::Bytes::from_slice(px).map_err(|_| PlatformError::Crypto)?,
        y: cosey::Bytes::from_slice(py).map_err(|_| PlatformError::Crypto)?,
    });
    Ok((public_key, z))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// An authenticator-side key agreement key, paired with [`TEST_AUTHENTICATOR_KEY`].
    pub(crate) fn authenticator_key_agreement() -> PublicKey {
        let secret = SecretKey::from_slice(&TEST_AUTHENTICATOR_KEY).unwrap();
        let point = secret.public_key().to_encoded_point(false);
        PublicKey::EcdhEsHkdf256Key(EcdhEsHkdf256PublicKey {
            x: cosey::Bytes::from_slice(point.x().unwrap()).unwrap(),
            y: cosey::Bytes::from_slice(point.y().unwrap()).unwrap(),
        })
    }

    pub(crate) const TEST_AUTHENTICATOR_KEY: [u8; 32] = [0x42; 32];

    fn authenticator_side_secret(platform: &PublicKey) -> Vec<u8> {
        let PublicKey::EcdhEsHkdf256Key(key) = platform else {
            panic!("unexpected key type");
        };
        let mut sec1 = vec![0x04];
        sec1.extend_from_slice(&key.x);
        sec1.extend_from_slice(&key.y);
        let peer = P256PublicKey::from_sec1_bytes(&sec1).unwrap();
        let secret = SecretKey::from_slice(&TEST_AUTHENTICATOR_KEY).unwrap();
        diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine())
            .raw_secret_bytes()
            .to_vec()
    }

    #[test]
    fn protocol_one_agrees_with_authenticator() {
        let proto = PinUvAuthProtocolOne::new();
        let (platform_key, shared_secret) = proto.encapsulate(&authenticator_key_agreement()).unwrap();
        let z = authenticator_side_secret(&platform_key);
        assert_eq!(shared_secret, Sha256::digest(&z).to_vec());
    }

    #[test]
    fn protocol_two_agrees_with_authenticator() {
        let proto = PinUvAuthProtocolTwo::new();
        let (platform_key, shared_secret) = proto.encapsulate(&authenticator_key_agreement()).unwrap();
        let z = authenticator_side_secret(&platform_key);
        let salt = [0u8; 32];
        assert_eq!(shared_secret.len(), 64);
        assert_eq!(
            &shared_secret[..32],
            hkdf_sha256(Some(&salt), &z, b"CTAP2 HMAC key", 32).unwrap()
        );
        assert_eq!(
            &shared_secret[32..],
            hkdf_sha256(Some(&salt), &z, b"CTAP2 AES key", 32).unwrap()
        );
    }

    #[test]
    fn protocol_one_encrypt_is_deterministic() {
        let proto = PinUvAuthProtocolOne::new();
        let key = [3u8; 32];
        let hash = pin_hash(b"1234");
        let first = proto.encrypt(&key, &hash).unwrap();
        assert_eq!(first, proto.encrypt(&key, &hash).unwrap());
        assert_eq!(proto.decrypt(&key, &first).unwrap(), hash);
    }

    #[test]
    fn protocol_two_prepends_iv() {
        let proto = PinUvAuthProtocolTwo::new();
        let key = [7u8; 64];
        let token = [5u8; 32];
        let ciphertext = proto.encrypt(&key, &token).unwrap();
        assert_eq!(ciphertext.len(), 16 + 32);
        assert_eq!(proto.decrypt(&key, &ciphertext).unwrap(), token);
        assert!(proto.decrypt(&key, &ciphertext[..8]).is_err());
    }

    #[test]
    fn authenticate_lengths() {
        let message = [1u8; 32];
        let one = PinUvAuthProtocolOne::new().authenticate(&[9; 32], &message).unwrap();
        let two = PinUvAuthProtocolTwo::new().authenticate(&[9; 64], &message).unwrap();
        assert_eq!(one.len(), 16);
        assert_eq!(two.len(), 32);
        assert_eq!(&hmac_sha256(&[9; 32], &message).unwrap()[..16], one.as_slice());
        assert_eq!(hmac_sha256(&[9; 32], &message).unwrap(), two);
    }

    #[test]
    fn unaligned_plaintext_is_rejected() {
        let proto = PinUvAuthProtocolOne::new();
        assert_eq!(
            proto.encrypt(&[0; 32], &[1, 2, 3]),
            Err(Error::Platform(PlatformError::Crypto))
        );
    }

    #[test]
    fn pin_hash_is_truncated_sha256() {
        let hash = pin_hash(b"1234");
        assert_eq!(hash.len(), 16);
        assert_eq!(hex::encode(&hash), "03ac674216f3e15c761ee1a5e255f067");
    }

    #[test]
    fn pin_policy() {
        assert!(check_pin_policy("1234").is_ok());
        assert!(check_pin_policy("123").is_err());
        assert!(check_pin_policy(&"1".repeat(64)).is_err());
        // Code points, not bytes
        assert!(check_pin_policy("äöüß").is_ok());
    }
}
