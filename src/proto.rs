#![allow(non_upper_case_globals)]

use std::borrow::Cow;

use byteorder::LittleEndian;
use bytes::BufMut;
use encoding::all::ASCII;
use encoding::codec::utf_16::UTF_16LE_ENCODING;
use encoding::{DecoderTrap, EncoderTrap, Encoding};
use failure::Error;
use generic_array::GenericArray;
use generic_array::typenum::U8;
use nom;
use num::FromPrimitive;

use errors::NtlmError;
use errors::ParseError::{MismatchedMsgType, MismatchedSignature};

/// A 16-bit unsigned integer that defines the information type in the Value field.
#[derive(Clone, Copy, Debug, FromPrimitive, PartialEq)]
#[repr(u16)]
pub enum AvId {
    /// Indicates that this is the last AV_PAIR in the list.
    EOL,
    /// The server's NetBIOS computer name.
    NbComputerName,
    /// The server's NetBIOS domain name.
    NbDomainName,
    /// The fully qualified domain name (FQDN) of the computer.
    DnsComputerName,
    /// The FQDN of the domain.
    DnsDomainName,
    /// The FQDN of the forest.
    DnsTreeName,
    /// A 32-bit value indicating server or client configuration.
    Flags,
    /// A FILETIME structure in little-endian byte order that contains the server local time.
    Timestamp,
    /// A Single_Host_Data structure.
    SingleHost,
    /// The SPN of the target server.
    TargetName,
    /// A channel bindings hash.
    ChannelBindings,
}

/// The `AvPair` structure defines an attribute/value pair.
///
/// The target-info blob a server sends is carried through this crate
/// verbatim; this codec exists so callers (and tests) can inspect or
/// build such blobs.
#[derive(Clone, Debug, PartialEq)]
pub struct AvPair<'a> {
    /// A 16-bit unsigned integer that defines the information type in the Value field.
    pub id: AvId,
    /// A variable-length byte-array that contains the value defined for this AV pair entry.
    pub value: Cow<'a, [u8]>,
}

impl<'a> AvPair<'a> {
    pub fn new(id: AvId, value: Cow<'a, [u8]>) -> AvPair<'a> {
        AvPair { id, value }
    }

    pub fn eol() -> AvPair<'a> {
        AvPair {
            id: AvId::EOL,
            value: Default::default(),
        }
    }

    pub fn size(&self) -> usize {
        kAvIdSize + kAvLenSize + self.value.as_ref().len()
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<usize, Error> {
        buf.put_u16::<LittleEndian>(self.id as u16);
        buf.put_u16::<LittleEndian>(self.value.as_ref().len() as u16);
        buf.put_slice(self.value.as_ref());

        Ok(self.size())
    }

    /// Serializes a whole attribute list into the raw form the messages carry.
    pub fn list_to_bytes(av_pairs: &[AvPair]) -> Result<Vec<u8>, Error> {
        let mut buf = vec![];

        for av_pair in av_pairs {
            av_pair.write_to(&mut buf)?;
        }

        Ok(buf)
    }
}

bitflags! {
    /// These flags define client or server NTLM capabilities supported by the sender.
    pub struct NegotiateFlags: u32 {
        /// If set, requests Unicode character set encoding.
        const NTLMSSP_NEGOTIATE_UNICODE = 0x0000_0001;
        /// If set, requests OEM character set encoding.
        const NTLMSSP_NEGOTIATE_OEM = 0x0000_0002;
        /// If set, a TargetName field of the CHALLENGE_MESSAGE (section 2.2.1.2) MUST be supplied.
        const NTLMSSP_REQUEST_TARGET = 0x0000_0004;
        /// If set, requests session key negotiation for message signatures.
        const NTLMSSP_NEGOTIATE_SIGN = 0x0000_0010;
        /// If set, requests session key negotiation for message confidentiality.
        const NTLMSSP_NEGOTIATE_SEAL = 0x0000_0020;
        /// If set, requests connectionless authentication.
        const NTLMSSP_NEGOTIATE_DATAGRAM = 0x0000_0040;
        /// If set, requests LAN Manager (LM) session key computation.
        const NTLMSSP_NEGOTIATE_LM_KEY = 0x0000_0080;
        /// If set, requests usage of the NTLM v1 session security protocol.
        const NTLMSSP_NEGOTIATE_NTLM = 0x0000_0200;
        /// If set, the domain name is provided (section 2.2.1.1).
        const NTLMSSP_NEGOTIATE_OEM_DOMAIN_SUPPLIED = 0x0000_1000;
        /// This flag indicates whether the Workstation field is present.
        const NTLMSSP_NEGOTIATE_OEM_WORKSTATION_SUPPLIED = 0x0000_2000;
        /// If set, requests the presence of a signature block on all messages.
        const NTLMSSP_NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;
        /// If set, TargetName MUST be a domain name.
        const NTLMSSP_TARGET_TYPE_DOMAIN = 0x0001_0000;
        /// If set, TargetName MUST be a server name.
        const NTLMSSP_TARGET_TYPE_SERVER = 0x0002_0000;
        /// If set, requests usage of the NTLM v2 session security.
        const NTLMSSP_NEGOTIATE_EXTENDED_SESSIONSECURITY = 0x0008_0000;
        /// If set, requests an identify level token.
        const NTLMSSP_NEGOTIATE_IDENTIFY = 0x0010_0000;
        /// If set, requests the usage of the LMOWF.
        const NTLMSSP_REQUEST_NON_NT_SESSION_KEY = 0x0040_0000;
        /// If set, indicates that the TargetInfo fields
        /// in the `ChallengeMessage` (section 2.2.1.2) are populated.
        const NTLMSSP_NEGOTIATE_TARGET_INFO = 0x0080_0000;
        /// If set, requests the protocol version number.
        const NTLMSSP_NEGOTIATE_VERSION = 0x0200_0000;
        /// If set, requests 128-bit session key negotiation.
        const NTLMSSP_NEGOTIATE_128 = 0x2000_0000;
        /// If set, requests an explicit key exchange.
        const NTLMSSP_NEGOTIATE_KEY_EXCH = 0x4000_0000;
        /// If set, requests 56-bit encryption.
        const NTLMSSP_NEGOTIATE_56 = 0x8000_0000;
    }
}

impl NegotiateFlags {
    /// The default client request: OEM text, a target name, classic NTLM
    /// plus the extended-session-security upgrade.
    pub fn default_client() -> NegotiateFlags {
        NegotiateFlags::NTLMSSP_NEGOTIATE_OEM | NegotiateFlags::NTLMSSP_REQUEST_TARGET
            | NegotiateFlags::NTLMSSP_NEGOTIATE_NTLM
            | NegotiateFlags::NTLMSSP_NEGOTIATE_ALWAYS_SIGN
            | NegotiateFlags::NTLMSSP_NEGOTIATE_EXTENDED_SESSIONSECURITY
    }
}

/// There are 3 types of messages in NTLM.
///
/// The message type is a field in every NTLM message header.
/// See [MS-NLMP] Section 2.2.
#[derive(Clone, Copy, Debug, FromPrimitive, PartialEq)]
#[repr(u32)]
pub enum MessageType {
    Negotiate = 0x01,
    Challenge = 0x02,
    Authenticate = 0x03,
}

/// The `Version` structure contains operating system version information that should be ignored.
///
/// This structure is used for debugging purposes only and its value does not affect NTLM message processing.
#[derive(Clone, Debug, PartialEq)]
pub struct Version {
    /// The major version number of the operating system in use.
    pub major: u8,
    /// The minor version number of the operating system in use.
    pub minor: u8,
    /// The build number of the operating system in use.
    pub build: u16,
    /// The current revision of the NTLMSSP in use.
    pub revision: u8,
}

impl Version {
    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<usize, Error> {
        buf.put_u8(self.major);
        buf.put_u8(self.minor);
        buf.put_u16::<LittleEndian>(self.build);
        buf.put_uint::<LittleEndian>(0, 3);
        buf.put_u8(self.revision);

        Ok(kVersionSize)
    }
}

/// Version 15 of the NTLMSSP is in use.
pub const NTLMSSP_REVISION_W2K3: u8 = 0x0f;

/// The server-issued 8-byte challenge nonce.
///
/// Kept as an opaque byte string rather than a native integer; the value
/// is an unsigned 64-bit quantity and is never used arithmetically.
pub type ServerNonce = GenericArray<u8, U8>;

const kSignature: &[u8] = b"NTLMSSP\0";
const kSignatureSize: usize = 8;
const kMesssageTypeSize: usize = 4;
const kFlagsSize: usize = 4;
const kFieldSize: usize = 8;
const kVersionSize: usize = 8;
const kChallengeSize: usize = 8;
const kReservedSize: usize = 8;
const kAvIdSize: usize = 2;
const kAvLenSize: usize = 2;

/// The shortest CHALLENGE_MESSAGE the decoder accepts.
pub const kChallengeMinimumSize: usize = 32;

/// Encodes text as UTF-16LE, the NTLM "Unicode" representation.
pub fn utf16(s: &str) -> Result<Vec<u8>, Error> {
    UTF_16LE_ENCODING
        .encode(s, EncoderTrap::Strict)
        .map_err(|err| NtlmError::EncodingFailure(err).into())
}

/// Encodes text in the "OEM" character set, which this crate maps to ASCII.
pub fn oem(s: &str) -> Result<Vec<u8>, Error> {
    ASCII
        .encode(s, EncoderTrap::Strict)
        .map_err(|err| NtlmError::EncodingFailure(err).into())
}

/// Encodes text in the character set the given flags negotiated.
pub fn encode_text(s: &str, flags: NegotiateFlags) -> Result<Vec<u8>, Error> {
    if flags.contains(NegotiateFlags::NTLMSSP_NEGOTIATE_UNICODE) {
        utf16(s)
    } else {
        oem(s)
    }
}

/// Decodes text from the character set the given flags negotiated.
pub fn decode_text(bytes: &[u8], flags: NegotiateFlags) -> Result<String, Error> {
    if flags.contains(NegotiateFlags::NTLMSSP_NEGOTIATE_UNICODE) {
        UTF_16LE_ENCODING
            .decode(bytes, DecoderTrap::Strict)
            .map_err(|err| NtlmError::EncodingFailure(err).into())
    } else {
        ASCII
            .decode(bytes, DecoderTrap::Strict)
            .map_err(|err| NtlmError::EncodingFailure(err).into())
    }
}

/// How `(len, max_len, offset)` descriptors are written for fields whose
/// payload is absent.
///
/// [MS-NLMP] wants offsets to reference a valid payload position even when
/// the corresponding "supplied" flag is unset, but a number of deployed
/// servers reject exactly that, so cURL (and this crate, by default) zeroes
/// the descriptor instead. The strict behavior stays available as an
/// explicit choice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AbsentFieldOffsets {
    /// Write a zero offset for absent fields (cURL-compatible, the default).
    Zeroed,
    /// Write the running payload offset even for absent fields, as [MS-NLMP]
    /// prescribes.
    PointAtPayload,
}

impl Default for AbsentFieldOffsets {
    fn default() -> AbsentFieldOffsets {
        AbsentFieldOffsets::Zeroed
    }
}

/// The `NegotiateMessage` defines an NTLM Negotiate message that is sent from the client to the server.
///
/// This message allows the client to specify its supported NTLM options to the server.
#[derive(Clone, Debug, PartialEq)]
pub struct NegotiateMessage<'a> {
    /// The client sets flags to indicate options it supports.
    pub flags: NegotiateFlags,
    /// A field containing DomainName information.
    pub domain_name: Option<Cow<'a, [u8]>>,
    /// A field containing WorkstationName information.
    pub workstation_name: Option<Cow<'a, [u8]>>,
    /// This structure should be used for debugging purposes only.
    pub version: Option<Version>,
}

impl<'a> NegotiateMessage<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<NegotiateMessage<'a>, Error> {
        match parse_negotiate_message(payload) {
            nom::IResult::Done(_, (mut msg, domain_name_field, workstation_name_field)) => {
                if msg.flags
                    .contains(NegotiateFlags::NTLMSSP_NEGOTIATE_OEM_DOMAIN_SUPPLIED)
                    && domain_name_field.length > 0
                {
                    msg.domain_name = Some(Cow::from(payload_slice(payload, &domain_name_field)?));
                }

                if msg.flags
                    .contains(NegotiateFlags::NTLMSSP_NEGOTIATE_OEM_WORKSTATION_SUPPLIED)
                    && workstation_name_field.length > 0
                {
                    msg.workstation_name =
                        Some(Cow::from(payload_slice(payload, &workstation_name_field)?));
                }

                Ok(msg)
            }
            nom::IResult::Error(err) => bail!(NtlmError::from(err)),
            nom::IResult::Incomplete(needed) => bail!(NtlmError::from(needed)),
        }
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<usize, Error> {
        self.write_to_with_offsets(buf, AbsentFieldOffsets::default())
    }

    pub fn write_to_with_offsets<B: BufMut>(
        &self,
        buf: &mut B,
        absent_fields: AbsentFieldOffsets,
    ) -> Result<usize, Error> {
        let mut offset = kSignatureSize + kMesssageTypeSize + kFlagsSize + kFieldSize * 2
            + if self.version.is_some() {
                kVersionSize
            } else {
                0
            };

        buf.put_slice(kSignature);
        buf.put_u32::<LittleEndian>(MessageType::Negotiate as u32);

        let mut flags = self.flags;

        if self.domain_name.is_some() {
            flags |= NegotiateFlags::NTLMSSP_NEGOTIATE_OEM_DOMAIN_SUPPLIED;
        }

        if self.workstation_name.is_some() {
            flags |= NegotiateFlags::NTLMSSP_NEGOTIATE_OEM_WORKSTATION_SUPPLIED;
        }

        if self.version.is_some() {
            flags |= NegotiateFlags::NTLMSSP_NEGOTIATE_VERSION;
        }

        buf.put_u32::<LittleEndian>(flags.bits());

        for name in &[&self.domain_name, &self.workstation_name] {
            if let Some(ref name) = **name {
                put_field(buf, name.len(), offset);

                offset += name.len();
            } else {
                match absent_fields {
                    AbsentFieldOffsets::Zeroed => put_field(buf, 0, 0),
                    AbsentFieldOffsets::PointAtPayload => put_field(buf, 0, offset),
                }
            }
        }

        if let Some(ref version) = self.version {
            version.write_to(buf)?;
        }

        if let Some(ref domain_name) = self.domain_name {
            buf.put_slice(domain_name.as_ref());
        }

        if let Some(ref workstation_name) = self.workstation_name {
            buf.put_slice(workstation_name.as_ref());
        }

        Ok(offset)
    }
}

/// The `ChallengeMessage` defines an NTLM challenge message
/// that is sent from the server to the client.
///
/// The `ChallengeMessage` is used by the server to challenge the client
/// to prove its identity.
#[derive(Clone, Debug, PartialEq)]
pub struct ChallengeMessage<'a> {
    /// The server sets flags to indicate options it supports or,
    /// if there has been a `NegotiateMessage` (section 2.2.1.1),
    /// the choices it has made from the options offered by the client.
    pub flags: NegotiateFlags,
    /// The 8-byte NTLM challenge nonce.
    pub server_challenge: ServerNonce,
    /// A field containing TargetName information.
    pub target_name: Option<Cow<'a, [u8]>>,
    /// A field containing the raw TargetInfo attribute list,
    /// carried through without interpretation.
    pub target_info: Option<Cow<'a, [u8]>>,
    /// This structure should be used for debugging purposes only.
    pub version: Option<Version>,
}

impl<'a> ChallengeMessage<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<ChallengeMessage<'a>, Error> {
        if payload.len() < kChallengeMinimumSize {
            bail!(NtlmError::IncompleteMessage(nom::Needed::Size(
                kChallengeMinimumSize
            )));
        }

        match parse_challenge_message(payload) {
            nom::IResult::Done(_, (mut msg, target_name_field, target_info_field)) => {
                if msg.flags.contains(NegotiateFlags::NTLMSSP_REQUEST_TARGET) {
                    msg.target_name = Some(Cow::from(payload_slice(payload, &target_name_field)?));
                }

                if msg.flags
                    .contains(NegotiateFlags::NTLMSSP_NEGOTIATE_TARGET_INFO)
                {
                    msg.target_info = Some(Cow::from(payload_slice(payload, &target_info_field)?));
                }

                Ok(msg)
            }
            nom::IResult::Error(err) => bail!(NtlmError::from(err)),
            nom::IResult::Incomplete(needed) => bail!(NtlmError::from(needed)),
        }
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<usize, Error> {
        let mut offset = kSignatureSize + kMesssageTypeSize + kFlagsSize + kFieldSize * 2
            + kChallengeSize + kReservedSize + if self.version.is_some() {
            kVersionSize
        } else {
            0
        };

        buf.put_slice(kSignature);
        buf.put_u32::<LittleEndian>(MessageType::Challenge as u32);

        if let Some(ref target_name) = self.target_name {
            put_field(buf, target_name.len(), offset);

            offset += target_name.len();
        } else {
            put_field(buf, 0, 0);
        }

        let mut flags = self.flags;

        if self.target_name.is_some() && !flags.contains(NegotiateFlags::NTLMSSP_REQUEST_TARGET) {
            flags |= NegotiateFlags::NTLMSSP_REQUEST_TARGET;
        }

        if self.target_info.is_some() {
            flags |= NegotiateFlags::NTLMSSP_NEGOTIATE_TARGET_INFO;
        }

        if self.version.is_some() {
            flags |= NegotiateFlags::NTLMSSP_NEGOTIATE_VERSION;
        }

        buf.put_u32::<LittleEndian>(flags.bits());

        buf.put_slice(self.server_challenge.as_slice());
        buf.put_u64::<LittleEndian>(0); // Reserved

        if let Some(ref target_info) = self.target_info {
            put_field(buf, target_info.len(), offset);

            offset += target_info.len();
        } else {
            put_field(buf, 0, 0);
        }

        if let Some(ref version) = self.version {
            version.write_to(buf)?;
        }

        if let Some(ref target_name) = self.target_name {
            buf.put_slice(target_name.as_ref());
        }

        if let Some(ref target_info) = self.target_info {
            buf.put_slice(target_info.as_ref());
        }

        Ok(offset)
    }
}

/// The decoded view of a server's CHALLENGE_MESSAGE: everything the client
/// needs to compute its authenticate response. Created once per handshake
/// and never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerChallenge {
    nonce: ServerNonce,
    flags: NegotiateFlags,
    target_name: Option<String>,
    target_info: Option<Vec<u8>>,
}

impl ServerChallenge {
    pub fn new(
        nonce: ServerNonce,
        flags: NegotiateFlags,
        target_name: Option<String>,
        target_info: Option<Vec<u8>>,
    ) -> ServerChallenge {
        ServerChallenge {
            nonce,
            flags,
            target_name,
            target_info,
        }
    }

    /// Decodes a raw CHALLENGE_MESSAGE in a single pass.
    pub fn decode(message: &[u8]) -> Result<ServerChallenge, Error> {
        let msg = ChallengeMessage::parse(message)?;

        ServerChallenge::from_message(&msg)
    }

    pub fn from_message(msg: &ChallengeMessage) -> Result<ServerChallenge, Error> {
        let target_name = match msg.target_name {
            Some(ref raw) => Some(decode_text(raw.as_ref(), msg.flags)?),
            None => None,
        };

        Ok(ServerChallenge {
            nonce: msg.server_challenge,
            flags: msg.flags,
            target_name,
            target_info: msg.target_info.as_ref().map(|raw| raw.as_ref().to_vec()),
        })
    }

    pub fn nonce(&self) -> &ServerNonce {
        &self.nonce
    }

    pub fn flags(&self) -> NegotiateFlags {
        self.flags
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_ref().map(|name| name.as_str())
    }

    /// The raw target-info blob, exactly as the server sent it.
    pub fn target_info(&self) -> Option<&[u8]> {
        self.target_info.as_ref().map(|raw| raw.as_slice())
    }

    /// A decoded view of the target-info attribute list, for callers that
    /// want to inspect it. The raw blob stays authoritative.
    pub fn target_info_pairs(&self) -> Result<Option<Vec<AvPair>>, Error> {
        match self.target_info {
            Some(ref raw) => Ok(Some(parse_av_pairs(raw)
                .to_full_result()
                .map_err(NtlmError::from)?)),
            None => Ok(None),
        }
    }
}

/// The `AuthenticateMessage` defines an NTLM authenticate message that is
/// sent from the client to the server after the challenge.
///
/// All text fields hold bytes already encoded in the negotiated character
/// set; the payload region carries them in fixed order after the header.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthenticateMessage<'a> {
    /// The flags negotiated during the handshake, echoed back.
    pub flags: NegotiateFlags,
    /// The calculated LM challenge response.
    pub lm_challenge_response: Cow<'a, [u8]>,
    /// The calculated NT challenge response.
    pub nt_challenge_response: Cow<'a, [u8]>,
    /// The domain or server name the client authenticates against.
    pub target_name: Cow<'a, [u8]>,
    /// The name of the user to be authenticated.
    pub user_name: Cow<'a, [u8]>,
    /// The name of the client machine.
    pub workstation_name: Cow<'a, [u8]>,
    /// The encrypted random session key; empty, since key exchange is not
    /// performed.
    pub session_key: Cow<'a, [u8]>,
}

impl<'a> AuthenticateMessage<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<AuthenticateMessage<'a>, Error> {
        match parse_authenticate_message(payload) {
            nom::IResult::Done(_, (flags, fields)) => Ok(AuthenticateMessage {
                flags,
                lm_challenge_response: Cow::from(payload_slice(payload, &fields[0])?),
                nt_challenge_response: Cow::from(payload_slice(payload, &fields[1])?),
                target_name: Cow::from(payload_slice(payload, &fields[2])?),
                user_name: Cow::from(payload_slice(payload, &fields[3])?),
                workstation_name: Cow::from(payload_slice(payload, &fields[4])?),
                session_key: Cow::from(payload_slice(payload, &fields[5])?),
            }),
            nom::IResult::Error(err) => bail!(NtlmError::from(err)),
            nom::IResult::Incomplete(needed) => bail!(NtlmError::from(needed)),
        }
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<usize, Error> {
        let mut offset = kSignatureSize + kMesssageTypeSize + kFieldSize * 6 + kFlagsSize;

        buf.put_slice(kSignature);
        buf.put_u32::<LittleEndian>(MessageType::Authenticate as u32);

        let payloads: [&[u8]; 6] = [
            self.lm_challenge_response.as_ref(),
            self.nt_challenge_response.as_ref(),
            self.target_name.as_ref(),
            self.user_name.as_ref(),
            self.workstation_name.as_ref(),
            self.session_key.as_ref(),
        ];

        for payload in &payloads {
            put_field(buf, payload.len(), offset);

            offset += payload.len();
        }

        buf.put_u32::<LittleEndian>(self.flags.bits());

        for payload in &payloads {
            buf.put_slice(payload);
        }

        Ok(offset)
    }
}

fn put_field<B: BufMut>(buf: &mut B, len: usize, offset: usize) {
    buf.put_u16::<LittleEndian>(len as u16);
    buf.put_u16::<LittleEndian>(len as u16);
    buf.put_u32::<LittleEndian>(offset as u32);
}

fn payload_slice<'a>(payload: &'a [u8], field: &Field) -> Result<&'a [u8], Error> {
    if field.length == 0 {
        return Ok(&[]);
    }

    let start = field.offset as usize;
    let end = start + field.length as usize;

    payload
        .get(start..end)
        .ok_or_else(|| NtlmError::OffsetOverflow.into())
}

#[cfg_attr(rustfmt, rustfmt_skip)]
named!(
    parse_av_pair<AvPair>,
    do_parse!(
        id: map_opt!(call!(nom::le_u16), |id| AvId::from_u16(id)) >>
        len: call!(nom::le_u16) >>
        value: map!(take!(len), Cow::from) >>
        (AvPair { id, value })
    )
);

named!(parse_av_pairs<Vec<AvPair>>, many1!(parse_av_pair));

#[cfg_attr(rustfmt, rustfmt_skip)]
named!(
    parse_negotiate_message<(NegotiateMessage, Field, Field)>,
    do_parse!(
        _signature:
            add_return_error!(
                nom::ErrorKind::Custom(MismatchedSignature as u32),
                verify!(take!(8), |signature| signature == kSignature)
            ) >>
        _msg_type: add_return_error!(
                nom::ErrorKind::Custom(MismatchedMsgType as u32),
                verify!(
                    map_opt!(nom::le_u32, |v| MessageType::from_u32(v)),
                    |msg_type| msg_type == MessageType::Negotiate
                )
            ) >>
        flags: map!(nom::le_u32, NegotiateFlags::from_bits_truncate) >>
        domain_name_field: call!(parse_field) >>
        workstation_name_field: call!(parse_field) >>
        version:
            cond!(
                flags.contains(NegotiateFlags::NTLMSSP_NEGOTIATE_VERSION),
                call!(parse_version)
            ) >>
        (
            NegotiateMessage {
                flags,
                domain_name: None,
                workstation_name: None,
                version,
            },
            domain_name_field,
            workstation_name_field
        )
    )
);

#[cfg_attr(rustfmt, rustfmt_skip)]
named!(
    parse_challenge_message<(ChallengeMessage, Field, Field)>,
    do_parse!(
        _signature:
            add_return_error!(
                nom::ErrorKind::Custom(MismatchedSignature as u32),
                verify!(take!(8), |signature| signature == kSignature)
            ) >>
        _msg_type: add_return_error!(
                nom::ErrorKind::Custom(MismatchedMsgType as u32),
                verify!(
                    map_opt!(nom::le_u32, |v| MessageType::from_u32(v)),
                    |msg_type| msg_type == MessageType::Challenge
                )
            ) >>
        target_name_field: call!(parse_field) >>
        flags: map!(nom::le_u32, NegotiateFlags::from_bits_truncate) >>
        server_challenge: map!(take!(8), |nonce| ServerNonce::clone_from_slice(nonce)) >>
        _reserved: take!(8) >>
        target_info_field: call!(parse_field) >>
        version:
            cond!(
                flags.contains(NegotiateFlags::NTLMSSP_NEGOTIATE_VERSION),
                call!(parse_version)
            ) >>
        (
            ChallengeMessage {
                flags,
                server_challenge,
                target_name: None,
                target_info: None,
                version,
            },
            target_name_field,
            target_info_field
        )
    )
);

#[cfg_attr(rustfmt, rustfmt_skip)]
named!(
    parse_authenticate_message<(NegotiateFlags, [Field; 6])>,
    do_parse!(
        _signature:
            add_return_error!(
                nom::ErrorKind::Custom(MismatchedSignature as u32),
                verify!(take!(8), |signature| signature == kSignature)
            ) >>
        _msg_type: add_return_error!(
                nom::ErrorKind::Custom(MismatchedMsgType as u32),
                verify!(
                    map_opt!(nom::le_u32, |v| MessageType::from_u32(v)),
                    |msg_type| msg_type == MessageType::Authenticate
                )
            ) >>
        lm_challenge_response_field: call!(parse_field) >>
        nt_challenge_response_field: call!(parse_field) >>
        target_name_field: call!(parse_field) >>
        user_name_field: call!(parse_field) >>
        workstation_name_field: call!(parse_field) >>
        session_key_field: call!(parse_field) >>
        flags: map!(nom::le_u32, NegotiateFlags::from_bits_truncate) >>
        (
            flags,
            [
                lm_challenge_response_field,
                nt_challenge_response_field,
                target_name_field,
                user_name_field,
                workstation_name_field,
                session_key_field
            ]
        )
    )
);

struct Field {
    pub length: u16,
    pub capacity: u16,
    pub offset: u32,
}

named!(
    parse_field<Field>,
    do_parse!(
        length: call!(nom::le_u16) >> capacity: call!(nom::le_u16) >> offset: call!(nom::le_u32) >> (Field {
            length,
            capacity,
            offset,
        })
    )
);

named!(
    parse_version<Version>,
    do_parse!(
        major: call!(nom::le_u8) >> minor: call!(nom::le_u8) >> build: call!(nom::le_u16) >> _reserved: take!(3)
            >> revision: call!(nom::le_u8) >> (Version {
            major,
            minor,
            build,
            revision,
        })
    )
);

#[cfg(test)]
mod tests {
    use super::*;

    use errors::NtlmError;

    #[test]
    fn negotiate_message() {
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let packet: &[u8] = &[
            // Signature (8 bytes):
            0x4e, 0x54, 0x4c, 0x4d, 0x53, 0x53, 0x50, 0x00,
            // MessageType (4 bytes):
            0x01, 0x00, 0x00, 0x00,
            // NegotiateFlags (4 bytes):
            0x07, 0xb2, 0x00, 0x02,
            // DomainNameFields (8 bytes):
            0x06, 0x00,             // length
            0x06, 0x00,             // capacity
            0x28, 0x00, 0x00, 0x00, // offset
            // WorkstationFields (8 bytes):
            0x08, 0x00,             // length
            0x08, 0x00,             // capacity
            0x2E, 0x00, 0x00, 0x00, // offset
            // Version (8 bytes):
            0x05,                   // ProductMajorVersion (1 byte)
            0x00,                   // ProductMinorVersion (1 byte)
            0x93, 0x08,             // ProductBuild (2 bytes)
            0x00, 0x00, 0x00,       // Reserved (3 bytes)
            0x0f,                   // NTLMRevisionCurrent (1 byte)
            // Payload (variable):
            0x44, 0x4f, 0x4d, 0x41, 0x49, 0x4e,             // DomainName ("DOMAIN")
            0x43, 0x4f, 0x4d, 0x50, 0x55, 0x54, 0x45, 0x52  // Workstation ("COMPUTER")
        ];

        let message = NegotiateMessage {
            flags: NegotiateFlags::NTLMSSP_NEGOTIATE_UNICODE | NegotiateFlags::NTLMSSP_NEGOTIATE_OEM
                | NegotiateFlags::NTLMSSP_REQUEST_TARGET
                | NegotiateFlags::NTLMSSP_NEGOTIATE_NTLM
                | NegotiateFlags::NTLMSSP_NEGOTIATE_OEM_DOMAIN_SUPPLIED
                | NegotiateFlags::NTLMSSP_NEGOTIATE_OEM_WORKSTATION_SUPPLIED
                | NegotiateFlags::NTLMSSP_NEGOTIATE_ALWAYS_SIGN
                | NegotiateFlags::NTLMSSP_NEGOTIATE_VERSION,
            domain_name: Some(Cow::from(&b"DOMAIN"[..])),
            workstation_name: Some(Cow::from(&b"COMPUTER"[..])),
            version: Some(Version {
                major: 5,
                minor: 0,
                build: 2195,
                revision: NTLMSSP_REVISION_W2K3,
            }),
        };

        assert_eq!(NegotiateMessage::parse(packet).unwrap(), message);

        let mut buf: Vec<u8> = vec![];

        assert_eq!(message.write_to(&mut buf).unwrap(), packet.len());
        assert_eq!(buf.as_slice(), packet);
    }

    #[test]
    fn negotiate_message_absent_field_offsets() {
        let message = NegotiateMessage {
            flags: NegotiateFlags::default_client(),
            domain_name: None,
            workstation_name: None,
            version: None,
        };

        let mut zeroed: Vec<u8> = vec![];

        message
            .write_to_with_offsets(&mut zeroed, AbsentFieldOffsets::Zeroed)
            .unwrap();

        assert_eq!(zeroed.len(), 32);
        assert_eq!(&zeroed[16..24], &[0u8; 8][..]);
        assert_eq!(&zeroed[24..32], &[0u8; 8][..]);

        let mut strict: Vec<u8> = vec![];

        message
            .write_to_with_offsets(&mut strict, AbsentFieldOffsets::PointAtPayload)
            .unwrap();

        assert_eq!(strict.len(), 32);
        // Zero lengths, but offsets referencing the (empty) payload region.
        assert_eq!(&strict[16..24], &[0, 0, 0, 0, 0x20, 0, 0, 0][..]);
        assert_eq!(&strict[24..32], &[0, 0, 0, 0, 0x20, 0, 0, 0][..]);

        // Both forms round-trip to the same fixed fields.
        assert_eq!(NegotiateMessage::parse(&zeroed).unwrap(), message);
        assert_eq!(NegotiateMessage::parse(&strict).unwrap(), message);
    }

    fn sample_target_info() -> Vec<u8> {
        AvPair::list_to_bytes(&[
            AvPair::new(AvId::NbDomainName, utf16("DOMAIN").unwrap().into()),
            AvPair::new(AvId::NbComputerName, utf16("SERVER").unwrap().into()),
            AvPair::new(AvId::DnsDomainName, utf16("domain.com").unwrap().into()),
            AvPair::new(
                AvId::DnsComputerName,
                utf16("server.domain.com").unwrap().into(),
            ),
            AvPair::eol(),
        ]).unwrap()
    }

    #[test]
    fn challenge_message() {
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let packet: &[u8] = &[
            // Signature (8 bytes):
            0x4e, 0x54, 0x4c, 0x4d, 0x53, 0x53, 0x50, 0x00,
            // MessageType (4 bytes):
            0x02, 0x00, 0x00, 0x00,
            // TargetNameFields (8 bytes):
            0x0c, 0x00,
            0x0c, 0x00,
            0x30, 0x00, 0x00, 0x00,
            // NegotiateFlags (4 bytes):
            0x05, 0x02, 0x81, 0x00,
            // ServerChallenge (8 bytes):
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
            // Reserved (8 bytes):
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // TargetInfoFields (8 bytes):
            0x62, 0x00,
            0x62, 0x00,
            0x3c, 0x00, 0x00, 0x00,
            // TargetName ("DOMAIN" in UTF-16LE):
            0x44, 0x00, 0x4f, 0x00, 0x4d, 0x00, 0x41, 0x00, 0x49, 0x00, 0x4e, 0x00,
            // TargetInfo (variable):
            //   NetBIOS domain name ("DOMAIN"):
            0x02, 0x00,
            0x0c, 0x00,
            0x44, 0x00, 0x4f, 0x00, 0x4d, 0x00, 0x41, 0x00, 0x49, 0x00, 0x4e, 0x00,
            //   NetBIOS computer name ("SERVER"):
            0x01, 0x00,
            0x0c, 0x00,
            0x53, 0x00, 0x45, 0x00, 0x52, 0x00, 0x56, 0x00, 0x45, 0x00, 0x52, 0x00,
            //   DNS domain name ("domain.com"):
            0x04, 0x00,
            0x14, 0x00,
            0x64, 0x00, 0x6f, 0x00, 0x6d, 0x00, 0x61, 0x00, 0x69, 0x00,
            0x6e, 0x00, 0x2e, 0x00, 0x63, 0x00, 0x6f, 0x00, 0x6d, 0x00,
            //   DNS computer name ("server.domain.com"):
            0x03, 0x00,
            0x22, 0x00,
            0x73, 0x00, 0x65, 0x00, 0x72, 0x00, 0x76, 0x00, 0x65, 0x00,
            0x72, 0x00, 0x2e, 0x00, 0x64, 0x00, 0x6f, 0x00, 0x6d, 0x00,
            0x61, 0x00, 0x69, 0x00, 0x6e, 0x00, 0x2e, 0x00, 0x63, 0x00, 0x6f, 0x00, 0x6d, 0x00,
            //   Terminator:
            0x00, 0x00,
            0x00, 0x00
        ];

        let message = ChallengeMessage {
            flags: NegotiateFlags::NTLMSSP_NEGOTIATE_UNICODE
                | NegotiateFlags::NTLMSSP_REQUEST_TARGET
                | NegotiateFlags::NTLMSSP_NEGOTIATE_NTLM
                | NegotiateFlags::NTLMSSP_TARGET_TYPE_DOMAIN
                | NegotiateFlags::NTLMSSP_NEGOTIATE_TARGET_INFO,
            server_challenge: ServerNonce::clone_from_slice(&[
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
            ]),
            target_name: Some(utf16("DOMAIN").unwrap().into()),
            target_info: Some(sample_target_info().into()),
            version: None,
        };

        assert_eq!(ChallengeMessage::parse(packet).unwrap(), message);

        let mut buf: Vec<u8> = vec![];

        assert_eq!(message.write_to(&mut buf).unwrap(), packet.len());
        assert_eq!(buf.as_slice(), packet);
    }

    #[test]
    fn challenge_message_rejects_short_buffer() {
        let err = ChallengeMessage::parse(&[0u8; 31]).unwrap_err();

        assert_matches!(
            err.downcast_ref::<NtlmError>(),
            Some(&NtlmError::IncompleteMessage(_))
        );
    }

    #[test]
    fn challenge_message_rejects_bad_signature() {
        let mut packet = vec![0u8; 48];

        packet[..8].copy_from_slice(b"NTLMSSX\0");
        packet[8] = 0x02;

        let err = ChallengeMessage::parse(&packet).unwrap_err();

        assert_matches!(
            err.downcast_ref::<NtlmError>(),
            Some(&NtlmError::MismatchedSignature)
        );
    }

    #[test]
    fn challenge_message_rejects_bad_message_type() {
        let mut packet = vec![0u8; 48];

        packet[..8].copy_from_slice(kSignature);
        packet[8] = 0x03;

        let err = ChallengeMessage::parse(&packet).unwrap_err();

        assert_matches!(
            err.downcast_ref::<NtlmError>(),
            Some(&NtlmError::MismatchedMessageType)
        );
    }

    #[test]
    fn challenge_message_rejects_out_of_range_offsets() {
        let mut packet = vec![0u8; 48];

        packet[..8].copy_from_slice(kSignature);
        packet[8] = 0x02;
        // TargetName descriptor pointing past the end of the buffer.
        packet[12] = 0x0c;
        packet[14] = 0x0c;
        packet[16] = 0xff;
        // Flags: REQUEST_TARGET, so the descriptor is honored.
        packet[20] = 0x04;

        let err = ChallengeMessage::parse(&packet).unwrap_err();

        assert_matches!(
            err.downcast_ref::<NtlmError>(),
            Some(&NtlmError::OffsetOverflow)
        );
    }

    #[test]
    fn server_challenge_decoding() {
        let target_info = sample_target_info();
        let message = ChallengeMessage {
            flags: NegotiateFlags::NTLMSSP_NEGOTIATE_UNICODE
                | NegotiateFlags::NTLMSSP_REQUEST_TARGET
                | NegotiateFlags::NTLMSSP_NEGOTIATE_TARGET_INFO,
            server_challenge: ServerNonce::clone_from_slice(&[
                0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef,
            ]),
            target_name: Some(utf16("Domain").unwrap().into()),
            target_info: Some(Cow::from(target_info.clone())),
            version: None,
        };

        let mut buf: Vec<u8> = vec![];

        message.write_to(&mut buf).unwrap();

        let challenge = ServerChallenge::decode(&buf).unwrap();

        assert_eq!(
            challenge.nonce().as_slice(),
            &[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef][..]
        );
        assert_eq!(challenge.flags(), message.flags);
        assert_eq!(challenge.target_name(), Some("Domain"));
        assert_eq!(challenge.target_info(), Some(target_info.as_slice()));

        let av_pairs = challenge.target_info_pairs().unwrap().unwrap();

        assert_eq!(av_pairs.len(), 5);
        assert_eq!(av_pairs[0].id, AvId::NbDomainName);
        assert_eq!(av_pairs[4], AvPair::eol());
    }

    #[test]
    fn server_challenge_without_optional_payloads() {
        let message = ChallengeMessage {
            flags: NegotiateFlags::NTLMSSP_NEGOTIATE_UNICODE | NegotiateFlags::NTLMSSP_NEGOTIATE_NTLM,
            server_challenge: ServerNonce::clone_from_slice(&[0xaa; 8]),
            target_name: None,
            target_info: None,
            version: None,
        };

        let mut buf: Vec<u8> = vec![];

        message.write_to(&mut buf).unwrap();

        let challenge = ServerChallenge::decode(&buf).unwrap();

        assert_eq!(challenge.target_name(), None);
        assert_eq!(challenge.target_info(), None);
        assert_eq!(challenge.target_info_pairs().unwrap(), None);
    }

    #[test]
    fn authenticate_message() {
        let message = AuthenticateMessage {
            flags: NegotiateFlags::NTLMSSP_NEGOTIATE_UNICODE | NegotiateFlags::NTLMSSP_NEGOTIATE_NTLM,
            lm_challenge_response: Cow::from(&[0xaa; 24][..]),
            nt_challenge_response: Cow::from(&[0xbb; 24][..]),
            target_name: utf16("DOMAIN").unwrap().into(),
            user_name: utf16("user").unwrap().into(),
            workstation_name: utf16("HOST").unwrap().into(),
            session_key: Cow::Borrowed(&[]),
        };

        let mut buf: Vec<u8> = vec![];

        assert_eq!(message.write_to(&mut buf).unwrap(), buf.len());
        assert_eq!(buf.len(), 64 + 24 + 24 + 12 + 8 + 8);

        // LM response descriptor: 24 bytes right after the fixed header.
        assert_eq!(&buf[12..20], &[24, 0, 24, 0, 64, 0, 0, 0][..]);
        // NT response descriptor follows cumulatively.
        assert_eq!(&buf[20..28], &[24, 0, 24, 0, 88, 0, 0, 0][..]);
        // Target name, user name, workstation, session key.
        assert_eq!(&buf[28..36], &[12, 0, 12, 0, 112, 0, 0, 0][..]);
        assert_eq!(&buf[36..44], &[8, 0, 8, 0, 124, 0, 0, 0][..]);
        assert_eq!(&buf[44..52], &[8, 0, 8, 0, 132, 0, 0, 0][..]);
        assert_eq!(&buf[52..60], &[0, 0, 0, 0, 140, 0, 0, 0][..]);
        // Flags sit between the descriptors and the payload.
        assert_eq!(&buf[60..64], &[0x01, 0x02, 0x00, 0x00][..]);

        assert_eq!(AuthenticateMessage::parse(&buf).unwrap(), message);
    }

    #[test]
    fn text_encoding_follows_negotiated_charset() {
        let unicode = NegotiateFlags::NTLMSSP_NEGOTIATE_UNICODE;
        let oem_flags = NegotiateFlags::NTLMSSP_NEGOTIATE_OEM;

        assert_eq!(
            encode_text("User", unicode).unwrap(),
            vec![0x55, 0x00, 0x73, 0x00, 0x65, 0x00, 0x72, 0x00]
        );
        assert_eq!(encode_text("User", oem_flags).unwrap(), b"User".to_vec());

        assert_eq!(
            decode_text(&[0x55, 0x00, 0x73, 0x00, 0x65, 0x00, 0x72, 0x00], unicode).unwrap(),
            "User"
        );

        // OEM is ASCII; anything outside of it must fail loudly.
        let err = encode_text("D\u{f6}main", oem_flags).unwrap_err();

        assert_matches!(
            err.downcast_ref::<NtlmError>(),
            Some(&NtlmError::EncodingFailure(_))
        );
    }
}
