#![allow(non_upper_case_globals)]

use std::borrow::Cow;
use std::iter::{self, FromIterator};

use byteorder::LittleEndian;
use bytes::BufMut;
use failure::Error;
use generic_array::GenericArray;
use generic_array::typenum::{U24, U8};
use itertools;
use time::get_time;

use credential::{Credential, Hash, HashKind};
use crypt::{expand_56bit_key, CipherMode, DesCipher, DesEngine, DigestEngine, HmacMd5Digest,
            KeyedDigest, Md5Digest, RandomSource, SystemRandom};
use errors::NtlmError;
use hash::{LmHasher, NtV1Hasher, NtV2Hasher};
use proto::{encode_text, AuthenticateMessage, NegotiateFlags, ServerChallenge, ServerNonce};

/// The client-generated 8-byte challenge used by the extended-session-security
/// and NTLMv2 schemes.
pub type ClientChallenge = GenericArray<u8, U8>;

const kDeslFullKeyLen: usize = 21;
const kDeslKeyBlockLen: usize = 7;
const kClientChallengeLen: usize = 8;
const kLmResponseLen: usize = 24;
const kSessionChallengeLen: usize = 8;
const kBlobResponseVersion: u8 = 0x01;
const kBlobHighestResponseVersion: u8 = 0x01;

/// Encrypts an 8-byte data item with a 16-byte key using the Data Encryption
/// Standard Long (DESL) algorithm: the key is null-padded to 21 bytes, split
/// into three 7-byte blocks, and the data is DES-ECB encrypted under each
/// expanded block key, giving a 24-byte result.
pub fn desl<C: DesCipher>(
    cipher: &C,
    hash: &Hash,
    data: &GenericArray<u8, U8>,
) -> Result<GenericArray<u8, U24>, Error> {
    let key = hash.value()
        .iter()
        .cloned()
        .chain(iter::repeat(0))
        .take(kDeslFullKeyLen)
        .collect::<Vec<u8>>();

    let mut response = itertools::repeat_n(data.as_slice(), 3)
        .flat_map(|block| block.iter().cloned())
        .collect::<Vec<u8>>();

    for (key_block, data_block) in key.chunks(kDeslKeyBlockLen).zip(response.chunks_mut(8)) {
        let block_key = expand_56bit_key(GenericArray::from_slice(key_block));
        let encrypted = cipher.encrypt(&block_key, data_block, CipherMode::Ecb, &[])?;

        data_block.copy_from_slice(&encrypted);
    }

    Ok(GenericArray::from_iter(response.into_iter()))
}

/// Draws a fresh 8-byte client challenge from the given random source.
pub fn generate_challenge<R: RandomSource>(random: &R) -> Result<ClientChallenge, Error> {
    let bytes = random.random_bytes(kClientChallengeLen)?;

    Ok(ClientChallenge::from_iter(bytes.into_iter()))
}

/// Encodes the "blob" (called "temp" in the official documentation) that is
/// both hashed into the NTLMv2 NT proof and shipped inside the NT response.
///
/// The timestamp is the legacy 32-bit little-endian count of seconds since
/// the epoch, null-padded to the 8-byte field; sub-second precision is not
/// preserved. The target info is carried verbatim.
pub fn encode_blob(timestamp: u32, client_challenge: &ClientChallenge, target_info: &[u8]) -> Vec<u8> {
    let mut blob = vec![];

    blob.put_u8(kBlobResponseVersion); // RespType
    blob.put_u8(kBlobHighestResponseVersion); // HiRespType
    blob.put_slice(&[0u8; 6]); // Reserved1
    blob.put_u32::<LittleEndian>(timestamp);
    blob.put_u32::<LittleEndian>(0); // Timestamp padding
    blob.put_slice(client_challenge.as_slice());
    blob.put_u32::<LittleEndian>(0); // Reserved2
    blob.put_slice(target_info);
    blob.put_u32::<LittleEndian>(0); // Reserved3

    blob
}

/// The LM side of an AUTHENTICATE_MESSAGE response pair.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LmChallengeResponse {
    V1 { response: Vec<u8> },
    V2 { response: Vec<u8>, challenge: Vec<u8> },
}

impl LmChallengeResponse {
    pub fn v1<C: DesCipher>(
        cipher: &C,
        lm_hash: &Hash,
        nonce: &ServerNonce,
    ) -> Result<LmChallengeResponse, Error> {
        let response = desl(cipher, lm_hash, nonce)?;

        Ok(LmChallengeResponse::V1 {
            response: response.to_vec(),
        })
    }

    /// With extended session security the LM field only carries the client
    /// challenge, null-padded to the classic 24-byte length.
    pub fn with_extended_session_security(client_challenge: &ClientChallenge) -> LmChallengeResponse {
        let mut response = client_challenge.as_slice().to_vec();

        response.extend(iter::repeat(0).take(kLmResponseLen - kClientChallengeLen));

        LmChallengeResponse::V1 { response }
    }

    pub fn v2<K: KeyedDigest>(
        keyed: &K,
        nt_v2_hash: &Hash,
        nonce: &ServerNonce,
        client_challenge: &ClientChallenge,
    ) -> LmChallengeResponse {
        let mut hmac = keyed.rekey(nt_v2_hash.value());

        let response = hmac.update(nonce.as_slice())
            .update(client_challenge.as_slice())
            .finalize();

        LmChallengeResponse::V2 {
            response: response.to_vec(),
            challenge: client_challenge.as_slice().to_vec(),
        }
    }

    pub fn response(&self) -> &[u8] {
        match *self {
            LmChallengeResponse::V1 { ref response }
            | LmChallengeResponse::V2 { ref response, .. } => response,
        }
    }

    /// The full value of the LM response field.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            LmChallengeResponse::V1 { ref response } => response.clone(),
            LmChallengeResponse::V2 {
                ref response,
                ref challenge,
            } => {
                let mut bytes = response.clone();

                bytes.extend_from_slice(challenge);
                bytes
            }
        }
    }
}

/// The NT side of an AUTHENTICATE_MESSAGE response pair.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NtChallengeResponse {
    V1 { response: Vec<u8> },
    V2 { response: Vec<u8>, blob: Vec<u8> },
}

impl NtChallengeResponse {
    pub fn v1<C: DesCipher>(
        cipher: &C,
        nt_hash: &Hash,
        nonce: &ServerNonce,
    ) -> Result<NtChallengeResponse, Error> {
        let response = desl(cipher, nt_hash, nonce)?;

        Ok(NtChallengeResponse::V1 {
            response: response.to_vec(),
        })
    }

    /// The extended-session-security variant binds the client challenge into
    /// the response: the DESL input is the first 8 bytes of
    /// MD5(server nonce || client challenge) instead of the raw nonce.
    pub fn with_extended_session_security<C: DesCipher, D: DigestEngine>(
        cipher: &C,
        session_digest: &D,
        nt_hash: &Hash,
        nonce: &ServerNonce,
        client_challenge: &ClientChallenge,
    ) -> Result<NtChallengeResponse, Error> {
        let mut digest = session_digest.clone();

        let session_hash = digest
            .update(nonce.as_slice())
            .update(client_challenge.as_slice())
            .finalize();

        let response = desl(
            cipher,
            nt_hash,
            GenericArray::from_slice(&session_hash[..kSessionChallengeLen]),
        )?;

        Ok(NtChallengeResponse::V1 {
            response: response.to_vec(),
        })
    }

    pub fn v2<K: KeyedDigest>(
        keyed: &K,
        nt_v2_hash: &Hash,
        nonce: &ServerNonce,
        blob: Vec<u8>,
    ) -> NtChallengeResponse {
        let mut hmac = keyed.rekey(nt_v2_hash.value());

        let response = hmac.update(nonce.as_slice()).update(&blob).finalize();

        NtChallengeResponse::V2 {
            response: response.to_vec(),
            blob,
        }
    }

    /// The proof part of the response (the whole value for v1, the leading
    /// 16-byte NT proof string for v2).
    pub fn response(&self) -> &[u8] {
        match *self {
            NtChallengeResponse::V1 { ref response }
            | NtChallengeResponse::V2 { ref response, .. } => response,
        }
    }

    /// The full value of the NT response field.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            NtChallengeResponse::V1 { ref response } => response.clone(),
            NtChallengeResponse::V2 {
                ref response,
                ref blob,
            } => {
                let mut bytes = response.clone();

                bytes.extend_from_slice(blob);
                bytes
            }
        }
    }
}

/// Serializes an AUTHENTICATE_MESSAGE from its computed parts.
///
/// Text fields are encoded in the negotiated character set; the target and
/// workstation names are upper-cased, the username keeps its case. The
/// session key field stays empty, no key exchange takes place.
pub fn encode_authenticate_message(
    flags: NegotiateFlags,
    lm_challenge_response: Vec<u8>,
    nt_challenge_response: Vec<u8>,
    target_name: &str,
    username: &str,
    workstation: &str,
) -> Result<Vec<u8>, Error> {
    let message = AuthenticateMessage {
        flags,
        lm_challenge_response: lm_challenge_response.into(),
        nt_challenge_response: nt_challenge_response.into(),
        target_name: encode_text(&target_name.to_uppercase(), flags)?.into(),
        user_name: encode_text(username, flags)?.into(),
        workstation_name: encode_text(&workstation.to_uppercase(), flags)?.into(),
        session_key: Cow::Borrowed(&[]),
    };

    let mut buf = vec![];

    message.write_to(&mut buf)?;

    Ok(buf)
}

/// Builds AUTHENTICATE_MESSAGEs with the NTLMv1 scheme.
///
/// Accepts a plain-text password or a pre-computed LM or NTv1 hash; with a
/// single pre-computed hash, only the matching response side is derived.
#[derive(Clone, Debug, Default)]
pub struct NtlmV1AuthenticateEncoder<C = DesEngine, D = Md5Digest, R = SystemRandom> {
    cipher: C,
    lm_hasher: LmHasher<C>,
    nt_hasher: NtV1Hasher,
    session_digest: D,
    random: R,
}

impl<C, D, R> NtlmV1AuthenticateEncoder<C, D, R>
where
    C: DesCipher + Clone,
    D: DigestEngine,
    R: RandomSource,
{
    pub fn new(cipher: C, session_digest: D, random: R) -> NtlmV1AuthenticateEncoder<C, D, R> {
        NtlmV1AuthenticateEncoder {
            lm_hasher: LmHasher::new(cipher.clone()),
            nt_hasher: NtV1Hasher::default(),
            cipher,
            session_digest,
            random,
        }
    }

    pub fn encode(
        &self,
        username: &str,
        domain: &str,
        workstation: &str,
        credential: &Credential,
        challenge: &ServerChallenge,
    ) -> Result<Vec<u8>, Error> {
        let flags = challenge.flags();
        let nonce = challenge.nonce();
        let target_name = challenge.target_name().unwrap_or(domain);

        let client_challenge = if flags
            .contains(NegotiateFlags::NTLMSSP_NEGOTIATE_EXTENDED_SESSIONSECURITY)
        {
            Some(generate_challenge(&self.random)?)
        } else {
            None
        };

        let (lm_hash, nt_hash) = match *credential {
            Credential::Password(ref password) => (
                Some(self.lm_hasher.hash(password)?),
                Some(self.nt_hasher.hash(password)?),
            ),
            Credential::Hash(ref hash) => match hash.kind() {
                HashKind::Lm => (Some(hash.clone()), None),
                HashKind::NtV1 => (None, Some(hash.clone())),
                HashKind::NtV2 => bail!(NtlmError::UnsupportedCredential),
            },
        };

        let nt_response = match (nt_hash.as_ref(), client_challenge.as_ref()) {
            (Some(nt_hash), Some(client_challenge)) => {
                Some(NtChallengeResponse::with_extended_session_security(
                    &self.cipher,
                    &self.session_digest,
                    nt_hash,
                    nonce,
                    client_challenge,
                )?)
            }
            (Some(nt_hash), None) => Some(NtChallengeResponse::v1(&self.cipher, nt_hash, nonce)?),
            (None, _) => None,
        };

        let lm_response = match (lm_hash.as_ref(), client_challenge.as_ref()) {
            (_, Some(client_challenge)) => Some(LmChallengeResponse::with_extended_session_security(
                client_challenge,
            )),
            (Some(lm_hash), None) => Some(LmChallengeResponse::v1(&self.cipher, lm_hash, nonce)?),
            // When no LM hash is available the NT response doubles as the
            // LM response.
            (None, None) => nt_response.as_ref().map(|response| LmChallengeResponse::V1 {
                response: response.to_bytes(),
            }),
        };

        encode_authenticate_message(
            flags,
            lm_response.map(|response| response.to_bytes()).unwrap_or_default(),
            nt_response.map(|response| response.to_bytes()).unwrap_or_default(),
            target_name,
            username,
            workstation,
        )
    }
}

/// Builds AUTHENTICATE_MESSAGEs with the NTLMv2 scheme.
///
/// Accepts a plain-text password or a pre-computed NTv2 hash.
#[derive(Clone, Debug, Default)]
pub struct NtlmV2AuthenticateEncoder<K = HmacMd5Digest, R = SystemRandom> {
    hasher: NtV2Hasher<K>,
    keyed: K,
    random: R,
}

impl<K, R> NtlmV2AuthenticateEncoder<K, R>
where
    K: KeyedDigest,
    R: RandomSource,
{
    pub fn new(keyed: K, random: R) -> NtlmV2AuthenticateEncoder<K, R> {
        NtlmV2AuthenticateEncoder {
            hasher: NtV2Hasher::new(keyed.clone(), NtV1Hasher::default()),
            keyed,
            random,
        }
    }

    pub fn encode(
        &self,
        username: &str,
        domain: &str,
        workstation: &str,
        credential: &Credential,
        challenge: &ServerChallenge,
    ) -> Result<Vec<u8>, Error> {
        self.encode_with_time(
            username,
            domain,
            workstation,
            credential,
            challenge,
            get_time().sec as u32,
        )
    }

    /// Same as `encode`, with the blob timestamp supplied by the caller,
    /// which keeps the whole computation reproducible.
    pub fn encode_with_time(
        &self,
        username: &str,
        domain: &str,
        workstation: &str,
        credential: &Credential,
        challenge: &ServerChallenge,
        timestamp: u32,
    ) -> Result<Vec<u8>, Error> {
        let flags = challenge.flags();
        let nonce = challenge.nonce();
        let target_name = challenge.target_name().unwrap_or(domain);

        let nt_v2_hash = match *credential {
            Credential::Password(ref password) => {
                self.hasher.hash(password, username, target_name)?
            }
            Credential::Hash(ref hash) => {
                if hash.kind() != HashKind::NtV2 {
                    bail!(NtlmError::UnsupportedCredential);
                }

                hash.clone()
            }
        };

        let client_challenge = generate_challenge(&self.random)?;

        let blob = encode_blob(
            timestamp,
            &client_challenge,
            challenge.target_info().unwrap_or(&[]),
        );

        let lm_response = LmChallengeResponse::v2(&self.keyed, &nt_v2_hash, nonce, &client_challenge);
        let nt_response = NtChallengeResponse::v2(&self.keyed, &nt_v2_hash, nonce, blob);

        encode_authenticate_message(
            flags,
            lm_response.to_bytes(),
            nt_response.to_bytes(),
            target_name,
            username,
            workstation,
        )
    }
}
