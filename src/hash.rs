#![allow(non_upper_case_globals)]

use std::iter;

use failure::Error;
use generic_array::GenericArray;

use credential::{Hash, HashKind, Password};
use crypt::{expand_56bit_key, CipherMode, DesCipher, DesEngine, DigestEngine, HmacMd5Digest,
            KeyedDigest, Md4Digest};
use proto::utf16;

/// The fixed clear-text block every LM hash encrypts.
const kLmMagic: &[u8] = b"KGS!@#$%";
const kLmMaxPasswordLen: usize = 14;
const kLmHalfLen: usize = 7;

/// The LAN Manager one-way function (LMOWF).
///
/// Operates on the password as a raw byte string; only ASCII letters are
/// case-folded, everything else passes through untouched.
#[derive(Clone, Debug, Default)]
pub struct LmHasher<C = DesEngine> {
    cipher: C,
}

impl<C: DesCipher> LmHasher<C> {
    pub fn new(cipher: C) -> LmHasher<C> {
        LmHasher { cipher }
    }

    pub fn hash(&self, password: &Password) -> Result<Hash, Error> {
        let key = password
            .as_bytes()
            .iter()
            .take(kLmMaxPasswordLen)
            .map(|byte| byte.to_ascii_uppercase())
            .chain(iter::repeat(0))
            .take(kLmMaxPasswordLen)
            .collect::<Vec<u8>>();

        let mut value = Vec::with_capacity(kLmMagic.len() * 2);

        for half in key.chunks(kLmHalfLen) {
            let half_key = expand_56bit_key(GenericArray::from_slice(half));

            value.extend(self.cipher.encrypt(&half_key, kLmMagic, CipherMode::Ecb, &[])?);
        }

        Hash::from_bytes(&value, HashKind::Lm)
    }
}

/// The NT one-way function (NTOWF): MD4 over the UTF-16LE password.
#[derive(Clone, Debug, Default)]
pub struct NtV1Hasher<D = Md4Digest> {
    digest: D,
}

impl<D: DigestEngine> NtV1Hasher<D> {
    /// `digest` is kept as a pristine prototype; every hash runs on a
    /// fresh copy of it.
    pub fn new(digest: D) -> NtV1Hasher<D> {
        NtV1Hasher { digest }
    }

    pub fn hash(&self, password: &Password) -> Result<Hash, Error> {
        let unicode_password = utf16(password.as_str())?;

        let mut digest = self.digest.clone();

        let value = digest.update(&unicode_password).finalize();

        Hash::from_bytes(value.as_slice(), HashKind::NtV1)
    }
}

/// The NTLMv2 one-way function (NTOWFv2): HMAC-MD5 keyed with the NT hash
/// over the upper-cased username concatenated with the target name.
///
/// The target name keeps its original case.
#[derive(Clone, Debug, Default)]
pub struct NtV2Hasher<K = HmacMd5Digest, D = Md4Digest> {
    keyed: K,
    nt_v1: NtV1Hasher<D>,
}

impl<K: KeyedDigest, D: DigestEngine> NtV2Hasher<K, D> {
    pub fn new(keyed: K, nt_v1: NtV1Hasher<D>) -> NtV2Hasher<K, D> {
        NtV2Hasher { keyed, nt_v1 }
    }

    pub fn hash(&self, password: &Password, username: &str, target: &str) -> Result<Hash, Error> {
        let nt_v1_hash = self.nt_v1.hash(password)?;

        let identity = utf16(&format!("{}{}", username.to_uppercase(), target))?;

        let mut hmac = self.keyed.rekey(nt_v1_hash.value());

        let value = hmac.update(&identity).finalize();

        Hash::from_bytes(value.as_slice(), HashKind::NtV2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // [MS-NLMP] 4.2.1 common inputs.
    const kUsername: &str = "User";
    const kPassword: &str = "Password";
    const kDomain: &str = "Domain";

    #[test]
    fn lm_hash_reference_vectors() {
        let hasher: LmHasher = LmHasher::default();

        // [MS-NLMP] 4.2.2.2.2
        assert_eq!(
            hasher.hash(&Password::new(kPassword)).unwrap(),
            Hash::from_hex("e52cac67419a9a224a3b108f3fa6cb6d", HashKind::Lm).unwrap()
        );

        // The Davenport worked-example password.
        assert_eq!(
            hasher.hash(&Password::new("SecREt01")).unwrap(),
            Hash::from_hex("ff3750bcc2b22412c2265b23734e0dac", HashKind::Lm).unwrap()
        );
    }

    #[test]
    fn nt_v1_hash_reference_vectors() {
        let hasher: NtV1Hasher = NtV1Hasher::default();

        // [MS-NLMP] 4.2.2.1.2
        assert_eq!(
            hasher.hash(&Password::new(kPassword)).unwrap(),
            Hash::from_hex("a4f49c406510bdcab6824ee7c30fd852", HashKind::NtV1).unwrap()
        );

        assert_eq!(
            hasher.hash(&Password::new("SecREt01")).unwrap(),
            Hash::from_hex("cd06ca7c7e10c99b1d33b7485a2ed808", HashKind::NtV1).unwrap()
        );
    }

    #[test]
    fn nt_v2_hash_reference_vector() {
        let hasher: NtV2Hasher = NtV2Hasher::default();

        // [MS-NLMP] 4.2.4.1.1
        assert_eq!(
            hasher
                .hash(&Password::new(kPassword), kUsername, kDomain)
                .unwrap(),
            Hash::from_hex("0c868a403bfd7a93a3001ef22ef02e3f", HashKind::NtV2).unwrap()
        );
    }

    #[test]
    fn lm_hash_truncates_and_upper_cases() {
        let hasher: LmHasher = LmHasher::default();

        // Only the first 14 bytes take part.
        assert_eq!(
            hasher.hash(&Password::new("passphrase0123WASTED")).unwrap(),
            hasher.hash(&Password::new("PASSPHRASE0123")).unwrap()
        );

        // Case folding happens before hashing, so case does not matter.
        assert_eq!(
            hasher.hash(&Password::new("secret01")).unwrap(),
            hasher.hash(&Password::new("SECRET01")).unwrap()
        );
    }

    #[test]
    fn hashes_are_deterministic_and_sized() {
        let lm: LmHasher = LmHasher::default();
        let nt: NtV1Hasher = NtV1Hasher::default();
        let password = Password::new("SecREt01");

        let first = lm.hash(&password).unwrap();

        assert_eq!(first.value().len(), 16);
        assert_eq!(first, lm.hash(&password).unwrap());

        let first = nt.hash(&password).unwrap();

        assert_eq!(first.value().len(), 16);
        assert_eq!(first, nt.hash(&password).unwrap());
    }
}
