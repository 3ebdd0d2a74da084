use nom::multi::many0;
use nom::IResult;

use crate::types::{CipherSuite, ProtocolVersion, Random};
use crate::util::{put_vec_u16, put_vec_u8, vec_u16, vec_u8};

/// Cookies are at most this long.
pub const MAX_COOKIE_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub cookie: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    /// Uncompressed P-256 point.
    pub key_share: Vec<u8>,
}

impl ClientHello {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, cookie) = vec_u8(input)?;
        let (input, suites) = vec_u16(input)?;
        let (_, cipher_suites) = many0(CipherSuite::parse)(suites)?;
        let (input, key_share) = vec_u8(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                cookie: cookie.to_vec(),
                cipher_suites,
                key_share: key_share.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        self.client_version.serialize(out);
        out.extend_from_slice(&self.random.0);
        put_vec_u8(out, &self.cookie);
        let mut suites = Vec::with_capacity(self.cipher_suites.len() * 2);
        for suite in &self.cipher_suites {
            suites.extend_from_slice(&suite.as_u16().to_be_bytes());
        }
        put_vec_u16(out, &suites);
        put_vec_u8(out, &self.key_share);
    }

    /// The fields a cookie is bound to.
    pub fn cookie_input(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&self.random.0);
        for suite in &self.cipher_suites {
            out.extend_from_slice(&suite.as_u16().to_be_bytes());
        }
        out.extend_from_slice(&self.key_share);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub cipher_suite: CipherSuite,
    pub key_share: Vec<u8>,
}

impl ServerHello {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, key_share) = vec_u8(input)?;

        Ok((
            input,
            ServerHello {
                server_version,
                random,
                cipher_suite,
                key_share: key_share.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        self.server_version.serialize(out);
        out.extend_from_slice(&self.random.0);
        out.extend_from_slice(&self.cipher_suite.as_u16().to_be_bytes());
        put_vec_u8(out, &self.key_share);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub server_version: ProtocolVersion,
    pub cookie: Vec<u8>,
}

impl HelloVerifyRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, cookie) = vec_u8(input)?;
        Ok((
            input,
            HelloVerifyRequest {
                server_version,
                cookie: cookie.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        self.server_version.serialize(out);
        put_vec_u8(out, &self.cookie);
    }
}
