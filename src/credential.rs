use std::fmt;

use failure::Error;
use generic_array::GenericArray;
use generic_array::typenum::U16;

use errors::NtlmError;

/// All NTLM one-way functions produce a 16-byte digest.
pub const HASH_LENGTH: usize = 16;

/// The one-way function a stored hash value was derived with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashKind {
    /// Legacy LAN Manager hash (LMOWF).
    Lm,
    /// NT hash (NTOWF), an MD4 digest of the UTF-16LE password.
    NtV1,
    /// NTLMv2 hash (NTOWFv2), keyed by username and target name.
    NtV2,
}

/// A plain-text password.
///
/// Held only long enough to derive hashes from it; the crate never stores
/// or serializes the plain-text value.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new<S: Into<String>>(password: S) -> Password {
        Password(password.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl<'a> From<&'a str> for Password {
    fn from(password: &'a str) -> Password {
        Password::new(password)
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Password(****)")
    }
}

/// A hashed credential, safe for persistent storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hash {
    value: GenericArray<u8, U16>,
    kind: HashKind,
}

impl Hash {
    pub fn from_bytes(value: &[u8], kind: HashKind) -> Result<Hash, Error> {
        if value.len() != HASH_LENGTH {
            bail!(NtlmError::InvalidHashLength(HASH_LENGTH));
        }

        Ok(Hash {
            value: GenericArray::clone_from_slice(value),
            kind,
        })
    }

    /// Parses a hash from its 32-character hex representation,
    /// the format hashes are usually dumped and stored in.
    pub fn from_hex(hex: &str, kind: HashKind) -> Result<Hash, Error> {
        if hex.len() != HASH_LENGTH * 2 {
            bail!(NtlmError::InvalidHashLength(HASH_LENGTH));
        }

        let mut value = GenericArray::default();

        for (chunk, byte) in hex.as_bytes().chunks(2).zip(value.iter_mut()) {
            let hi = hex_digit(chunk[0])?;
            let lo = hex_digit(chunk[1])?;

            *byte = (hi << 4) | lo;
        }

        Ok(Hash { value, kind })
    }

    pub fn kind(&self) -> HashKind {
        self.kind
    }

    pub fn value(&self) -> &[u8] {
        self.value.as_slice()
    }

    pub fn to_hex(&self) -> String {
        self.value
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect()
    }
}

fn hex_digit(digit: u8) -> Result<u8, Error> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        _ => bail!(NtlmError::InvalidHexDigit),
    }
}

/// What the caller knows about a user: either the password itself
/// or a previously derived hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    Password(Password),
    Hash(Hash),
}

impl Credential {
    pub fn is_plaintext(&self) -> bool {
        match *self {
            Credential::Password(_) => true,
            Credential::Hash(_) => false,
        }
    }
}

impl From<Password> for Credential {
    fn from(password: Password) -> Credential {
        Credential::Password(password)
    }
}

impl From<Hash> for Credential {
    fn from(hash: Hash) -> Credential {
        Credential::Hash(hash)
    }
}
