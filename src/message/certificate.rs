use nom::multi::many0;
use nom::number::complete::be_u16;
use nom::IResult;

use crate::types::SignatureScheme;
use crate::util::{put_vec_u16, put_vec_u24, vec_u16, vec_u24};

/// Certificate chain, leaf first, each entry DER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMsg {
    pub chain: Vec<Vec<u8>>,
}

impl CertificateMsg {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateMsg> {
        let (input, list) = vec_u24(input)?;
        let (_, certs) = many0(vec_u24)(list)?;
        Ok((
            input,
            CertificateMsg {
                chain: certs.into_iter().map(|c| c.to_vec()).collect(),
            },
        ))
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        let mut list = Vec::new();
        for cert in &self.chain {
            put_vec_u24(&mut list, cert);
        }
        put_vec_u24(out, &list);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    pub scheme: SignatureScheme,
    /// DER encoded ECDSA signature.
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateVerify> {
        let (input, scheme) = be_u16(input)?;
        let (input, signature) = vec_u16(input)?;
        Ok((
            input,
            CertificateVerify {
                scheme: SignatureScheme::from_u16(scheme),
                signature: signature.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.scheme.as_u16().to_be_bytes());
        put_vec_u16(out, &self.signature);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub const VERIFY_DATA_LEN: usize = 12;

    pub fn parse(input: &[u8]) -> IResult<&[u8], Finished> {
        let (input, data) = nom::bytes::complete::take(Self::VERIFY_DATA_LEN)(input)?;
        Ok((
            input,
            Finished {
                verify_data: data.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.verify_data);
    }
}
