#![allow(non_upper_case_globals)]

use std::iter::FromIterator;

use crypto::digest::Digest;
use crypto::hmac::Hmac;
use crypto::mac::Mac;
use crypto::md5::Md5;
use des::{BlockCipher, Des};
use failure::Error;
use generic_array::GenericArray;
use generic_array::typenum::{U16, U7, U8};
use md4::{Digest as MD4Digest, Md4};
use rand::{thread_rng, RngCore};

use errors::NtlmError;

pub type DesKey56 = GenericArray<u8, U7>;
pub type DesKey = GenericArray<u8, U8>;
pub type DigestValue = GenericArray<u8, U16>;

const kDesBlockSize: usize = 8;

/// Block cipher chaining modes. NTLM only ever drives DES in ECB mode,
/// but the mode is part of the cipher contract.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CipherMode {
    Ecb,
}

/// Spreads a 7-byte key over 8 bytes by inserting a low bit after each
/// 7-bit group, then sets bit 0 of every byte to give the byte odd parity,
/// the classic DES key layout.
pub fn expand_56bit_key(key: &DesKey56) -> DesKey {
    let spread = [
        key[0] & 0xFE,
        (key[0] << 7) | (key[1] >> 1),
        (key[1] << 6) | (key[2] >> 2),
        (key[2] << 5) | (key[3] >> 3),
        (key[3] << 4) | (key[4] >> 4),
        (key[4] << 3) | (key[5] >> 5),
        (key[5] << 2) | (key[6] >> 6),
        key[6] << 1,
    ];

    GenericArray::from_iter(spread.iter().map(|&byte| set_odd_parity(byte)))
}

fn set_odd_parity(byte: u8) -> u8 {
    let byte = byte & 0xFE;

    byte | ((byte.count_ones() as u8 + 1) & 1)
}

/// Single-DES encryption over an injected block-cipher backend.
pub trait DesCipher {
    /// Encrypts `data` with an 8-byte `key` in the requested `mode`.
    ///
    /// ECB takes a zero-length `iv` and block-aligned data; anything else
    /// is a caller error, surfaced as `CryptoPrimitiveFailure`.
    fn encrypt(&self, key: &DesKey, data: &[u8], mode: CipherMode, iv: &[u8]) -> Result<Vec<u8>, Error>;
}

/// The default DES backend, on top of the `des` crate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DesEngine;

impl DesCipher for DesEngine {
    fn encrypt(&self, key: &DesKey, data: &[u8], mode: CipherMode, iv: &[u8]) -> Result<Vec<u8>, Error> {
        match mode {
            CipherMode::Ecb => {}
        }

        if !iv.is_empty() {
            bail!(NtlmError::CryptoPrimitiveFailure(
                "DES-ECB expects a zero-length initialization vector"
            ));
        }

        if data.is_empty() || data.len() % kDesBlockSize != 0 {
            bail!(NtlmError::CryptoPrimitiveFailure(
                "DES-ECB data must be a whole number of 8-byte blocks"
            ));
        }

        let cipher = Des::new(key);
        let mut buf = data.to_vec();

        for block in buf.chunks_mut(kDesBlockSize) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }

        Ok(buf)
    }
}

/// A streaming message digest.
///
/// `finalize` leaves the engine intact, so a partially fed engine can keep
/// accumulating and be read again; engines buffer their input and recompute
/// the digest on demand, which keeps that contract trivial to honor.
/// An engine must be owned by a single computation at a time.
pub trait DigestEngine: Clone {
    fn update(&mut self, data: &[u8]) -> &mut Self;

    fn finalize(&self) -> DigestValue;
}

/// A keyed digest (HMAC) that can derive fresh engines for new keys.
pub trait KeyedDigest: DigestEngine {
    fn rekey(&self, key: &[u8]) -> Self;
}

/// MD4, via the `md4` crate.
#[derive(Clone, Debug, Default)]
pub struct Md4Digest {
    buffer: Vec<u8>,
}

impl DigestEngine for Md4Digest {
    fn update(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(data);
        self
    }

    fn finalize(&self) -> DigestValue {
        Md4::digest(&self.buffer)
    }
}

/// MD5, via rust-crypto.
#[derive(Clone, Debug, Default)]
pub struct Md5Digest {
    buffer: Vec<u8>,
}

impl DigestEngine for Md5Digest {
    fn update(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(data);
        self
    }

    fn finalize(&self) -> DigestValue {
        let mut md5 = Md5::new();

        md5.input(&self.buffer);

        let mut hash = vec![0u8; 16];

        md5.result(&mut hash);

        DigestValue::from_iter(hash.into_iter())
    }
}

/// HMAC-MD5, via rust-crypto.
#[derive(Clone, Debug, Default)]
pub struct HmacMd5Digest {
    key: Vec<u8>,
    buffer: Vec<u8>,
}

impl HmacMd5Digest {
    pub fn with_key(key: &[u8]) -> HmacMd5Digest {
        HmacMd5Digest {
            key: key.to_vec(),
            buffer: Vec::new(),
        }
    }
}

impl DigestEngine for HmacMd5Digest {
    fn update(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(data);
        self
    }

    fn finalize(&self) -> DigestValue {
        let mut hmac = Hmac::new(Md5::new(), &self.key);

        hmac.input(&self.buffer);

        DigestValue::from_iter(hmac.result().code().iter().cloned())
    }
}

impl KeyedDigest for HmacMd5Digest {
    fn rekey(&self, key: &[u8]) -> HmacMd5Digest {
        HmacMd5Digest::with_key(key)
    }
}

/// A cryptographically secure byte source. Either returns exactly the
/// requested number of bytes or fails loudly, never a short read.
pub trait RandomSource {
    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, Error>;
}

/// The default random source, backed by the thread-local CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![0u8; len];

        thread_rng()
            .try_fill_bytes(&mut bytes)
            .map_err(|_| NtlmError::CryptoPrimitiveFailure("random byte generation failed"))?;

        Ok(bytes)
    }
}
