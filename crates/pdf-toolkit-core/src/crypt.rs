//! Standard security handler primitives
//!
//! Key derivation and password checks for revisions 2-4 (PDF 32000-1,
//! 7.6.3), plus the two ciphers they use: RC4 and AES-128-CBC.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use md5::{Digest, Md5};

use crate::error::{PdfToolkitError, Result};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Algorithm 2, step a.
const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

pub(crate) const AES_BLOCK: usize = 16;

/// Parameters of a standard security handler that feed key derivation.
#[derive(Debug, Clone)]
pub(crate) struct KeyParams<'a> {
    pub revision: u32,
    /// File key length in bytes.
    pub key_length: usize,
    pub owner_entry: &'a [u8],
    pub permissions: i32,
    pub file_id: &'a [u8],
    pub encrypt_metadata: bool,
}

pub(crate) fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = PADDING;
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PADDING[..32 - len]);
    padded
}

/// Algorithm 2: file key from a user password.
pub(crate) fn file_key(password: &[u8], params: &KeyParams<'_>) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(pad_password(password));
    hasher.update(params.owner_entry);
    hasher.update(params.permissions.to_le_bytes());
    hasher.update(params.file_id);
    if params.revision >= 4 && !params.encrypt_metadata {
        hasher.update([0xFF; 4]);
    }
    let mut hash = hasher.finalize().to_vec();

    let n = params.key_length.min(16);
    if params.revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash[..n]).to_vec();
        }
    }
    hash.truncate(n);
    hash
}

/// RC4 key derived from the owner password (Algorithm 3, steps a-d).
fn owner_rc4_key(owner_password: &[u8], revision: u32, key_length: usize) -> Vec<u8> {
    let n = key_length.min(16);
    let mut hash = Md5::digest(pad_password(owner_password)).to_vec();
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash[..n]).to_vec();
        }
    }
    hash.truncate(n);
    hash
}

fn xor_key(key: &[u8], round: u8) -> Vec<u8> {
    key.iter().map(|b| b ^ round).collect()
}

/// Algorithm 3: the `O` entry.
pub(crate) fn owner_entry(
    owner_password: &[u8],
    user_password: &[u8],
    revision: u32,
    key_length: usize,
) -> Vec<u8> {
    let key = owner_rc4_key(owner_password, revision, key_length);
    let mut entry = rc4_crypt(&key, &pad_password(user_password));
    if revision >= 3 {
        for round in 1..=19u8 {
            entry = rc4_crypt(&xor_key(&key, round), &entry);
        }
    }
    entry
}

/// Algorithms 4 (R2) and 5 (R3+): the `U` entry for a file key.
pub(crate) fn user_entry(file_key: &[u8], revision: u32, file_id: &[u8]) -> Vec<u8> {
    if revision < 3 {
        return rc4_crypt(file_key, &PADDING);
    }
    let mut hasher = Md5::new();
    hasher.update(PADDING);
    hasher.update(file_id);
    let mut entry = hasher.finalize().to_vec();
    for round in 0..20u8 {
        entry = rc4_crypt(&xor_key(file_key, round), &entry);
    }
    entry.resize(32, 0);
    entry
}

/// Algorithm 6: the file key if `password` is the user password.
pub(crate) fn authenticate_user(
    password: &[u8],
    user_entry_stored: &[u8],
    params: &KeyParams<'_>,
) -> Option<Vec<u8>> {
    let key = file_key(password, params);
    let expected = user_entry(&key, params.revision, params.file_id);
    // R3+ only defines the first 16 bytes.
    let compared = if params.revision >= 3 { 16 } else { 32 };
    if user_entry_stored.len() < compared {
        return None;
    }
    constant_time_eq(&user_entry_stored[..compared], &expected[..compared]).then_some(key)
}

/// Algorithm 7: the file key if `password` is the owner password.
pub(crate) fn authenticate_owner(
    password: &[u8],
    user_entry_stored: &[u8],
    params: &KeyParams<'_>,
) -> Option<Vec<u8>> {
    let key = owner_rc4_key(password, params.revision, params.key_length);
    let mut user_password = params.owner_entry.to_vec();
    if params.revision >= 3 {
        for round in (0..=19u8).rev() {
            user_password = rc4_crypt(&xor_key(&key, round), &user_password);
        }
    } else {
        user_password = rc4_crypt(&key, &user_password);
    }
    authenticate_user(&user_password, user_entry_stored, params)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Algorithm 1: key for the strings and streams of one object.
pub(crate) fn object_key(file_key: &[u8], id: lopdf::ObjectId, aes: bool) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(file_key);
    hasher.update(&id.0.to_le_bytes()[..3]);
    hasher.update(id.1.to_le_bytes());
    if aes {
        hasher.update(b"sAlT");
    }
    let mut key = hasher.finalize().to_vec();
    key.truncate((file_key.len() + 5).min(16));
    key
}

struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (i, v) in s.iter_mut().enumerate() {
            *v = i as u8;
        }
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        Self { s, i: 0, j: 0 }
    }

    fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.s[self.i as usize]);
            self.s.swap(self.i as usize, self.j as usize);
            let k = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
            *byte ^= self.s[k as usize];
        }
    }
}

/// RC4 is symmetric: the same call encrypts and decrypts.
pub(crate) fn rc4_crypt(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    if key.is_empty() {
        return out;
    }
    Rc4::new(key).apply(&mut out);
    out
}

/// AES-128-CBC with PKCS#7 padding; the IV is prepended to the output.
pub(crate) fn aes128_encrypt(key: &[u8], iv: [u8; AES_BLOCK], data: &[u8]) -> Result<Vec<u8>> {
    let pad = AES_BLOCK - data.len() % AES_BLOCK;
    let mut buffer = data.to_vec();
    buffer.extend(std::iter::repeat(pad as u8).take(pad));

    let len = buffer.len();
    Aes128CbcEnc::new_from_slices(key, &iv)
        .map_err(|_| PdfToolkitError::Operation("AES key must be 16 bytes".into()))?
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|_| PdfToolkitError::Operation("AES encryption failed".into()))?;

    let mut out = Vec::with_capacity(AES_BLOCK + len);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&buffer);
    Ok(out)
}

/// Inverse of [`aes128_encrypt`]: expects the IV as the first block.
pub(crate) fn aes128_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let corrupt = |reason: &str| PdfToolkitError::Load(format!("Encrypted data: {}", reason));
    if data.len() < AES_BLOCK {
        // Too short to hold an IV; treated as empty.
        return Ok(Vec::new());
    }
    let (iv, body) = data.split_at(AES_BLOCK);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    if body.len() % AES_BLOCK != 0 {
        return Err(corrupt("length is not a multiple of the AES block size"));
    }

    let mut buffer = body.to_vec();
    let plain = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|_| PdfToolkitError::Operation("AES key must be 16 bytes".into()))?
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| corrupt("AES decryption failed"))?;

    let pad = plain[plain.len() - 1] as usize;
    if pad == 0 || pad > AES_BLOCK || plain[plain.len() - pad..].iter().any(|&b| b as usize != pad) {
        return Err(corrupt("invalid padding"));
    }
    Ok(plain[..plain.len() - pad].to_vec())
}

pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| PdfToolkitError::Operation(format!("No random source: {}", e)))?;
    Ok(bytes)
}
