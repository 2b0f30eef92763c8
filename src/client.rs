use failure::Error;
use hostname::get_hostname;

use auth::{NtlmV1AuthenticateEncoder, NtlmV2AuthenticateEncoder};
use credential::{Credential, HashKind};
use errors::NtlmError;
use proto::{oem, AbsentFieldOffsets, NegotiateFlags, NegotiateMessage, ServerChallenge, Version};

/// Client-side driver for the three-message handshake: build the negotiate
/// message, decode the server's challenge, answer it with an authenticate
/// message.
///
/// Holds configuration only; every call is independent and the client can
/// be shared freely.
#[derive(Clone, Debug)]
pub struct NtlmClient {
    /// A domain name or a NetBIOS name that identifies a domain.
    pub domain_name: Option<String>,
    /// The name of the client machine.
    pub workstation_name: Option<String>,
    /// This structure should be used for debugging purposes only.
    pub version: Option<Version>,
    /// Prefer the NTLMv2 scheme when the credential leaves a choice.
    pub prefer_ntlm_v2: bool,
    /// A Boolean setting that requires the client to use 128-bit encryption.
    pub require_128bit_encryption: bool,
    /// How descriptors for absent negotiate fields are written; some
    /// deployed servers only accept one of the two layouts.
    pub absent_field_offsets: AbsentFieldOffsets,
}

impl Default for NtlmClient {
    fn default() -> NtlmClient {
        NtlmClient {
            domain_name: None,
            workstation_name: get_hostname(),
            version: None,
            prefer_ntlm_v2: true,
            require_128bit_encryption: false,
            absent_field_offsets: AbsentFieldOffsets::default(),
        }
    }
}

impl NtlmClient {
    /// Builds the NEGOTIATE_MESSAGE bytes that open the handshake.
    pub fn start_negotiate(&self) -> Result<Vec<u8>, Error> {
        let mut flags = NegotiateFlags::default_client();

        if self.version.is_some() {
            flags |= NegotiateFlags::NTLMSSP_NEGOTIATE_VERSION;
        }

        let domain_name = match self.domain_name {
            Some(ref name) => Some(oem(&name.to_uppercase())?),
            None => None,
        };

        let workstation_name = match self.workstation_name {
            Some(ref name) => Some(oem(&name.to_uppercase())?),
            None => None,
        };

        let message = NegotiateMessage {
            flags,
            domain_name: domain_name.map(Into::into),
            workstation_name: workstation_name.map(Into::into),
            version: self.version.clone(),
        };

        trace!("negotiate message: {:?}", message);

        let mut buf = vec![];

        message.write_to_with_offsets(&mut buf, self.absent_field_offsets)?;

        Ok(buf)
    }

    /// Decodes the server's CHALLENGE_MESSAGE and answers it with an
    /// AUTHENTICATE_MESSAGE for the given user and credential.
    pub fn respond_to_challenge(
        &self,
        challenge_message: &[u8],
        username: &str,
        credential: &Credential,
    ) -> Result<Vec<u8>, Error> {
        let challenge = ServerChallenge::decode(challenge_message)?;

        debug!(
            "received challenge from `{}`, flags {:?}",
            challenge.target_name().unwrap_or_default(),
            challenge.flags()
        );

        if self.require_128bit_encryption
            && !challenge
                .flags()
                .contains(NegotiateFlags::NTLMSSP_NEGOTIATE_128)
        {
            bail!(NtlmError::UnsupportedFunction);
        }

        let domain = self.domain_name.as_ref().map_or("", |name| name.as_str());
        let workstation = self.workstation_name
            .as_ref()
            .map_or("", |name| name.as_str());

        // A pre-computed hash pins the scheme; only a password leaves the
        // choice to configuration.
        let use_ntlm_v2 = match *credential {
            Credential::Hash(ref hash) => hash.kind() == HashKind::NtV2,
            Credential::Password(_) => self.prefer_ntlm_v2,
        };

        if use_ntlm_v2 {
            let encoder: NtlmV2AuthenticateEncoder = NtlmV2AuthenticateEncoder::default();

            encoder.encode(username, domain, workstation, credential, &challenge)
        } else {
            let encoder: NtlmV1AuthenticateEncoder = NtlmV1AuthenticateEncoder::default();

            encoder.encode(username, domain, workstation, credential, &challenge)
        }
    }
}
