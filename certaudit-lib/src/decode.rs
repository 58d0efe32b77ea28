//! Certificate decoding from DER and PEM encodings.
//!
//! Decoding is an ordered list of [`DecodeStrategy`] implementations tried in
//! turn; the first one that succeeds wins. The default order is DER then
//! PEM, so a binary file is never mistaken for text.

use crate::fields::{Certificate, DistinguishedName, PublicKeyInfo};
use crate::fingerprint::compute_fingerprint;
use crate::oid;
use crate::util;
use num_bigint::BigUint;
use ::time::OffsetDateTime;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

/// Why a byte buffer could not be turned into certificates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty input")]
    Empty,

    #[error("invalid DER: {0}")]
    Der(String),

    #[error("invalid PEM: {0}")]
    Pem(String),

    #[error("no CERTIFICATE block found in PEM input")]
    NoCertificate,

    #[error("unsupported X.509 version {0} (expected v1, v2, or v3)")]
    UnsupportedVersion(u32),

    #[error("validity date out of range: {0}")]
    InvalidDate(String),

    #[error("{}", join_failures(.0))]
    AllStrategiesFailed(Vec<(&'static str, DecodeError)>),
}

fn join_failures(failures: &[(&'static str, DecodeError)]) -> String {
    failures
        .iter()
        .map(|(name, e)| format!("{}: {}", name, e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One way of turning bytes into certificates.
pub trait DecodeStrategy: Send + Sync {
    /// Short name used in error messages ("DER", "PEM").
    fn name(&self) -> &'static str;

    /// Decode every certificate in `input`. Must return at least one
    /// certificate on success.
    fn decode(&self, input: &[u8]) -> Result<Vec<Certificate>, DecodeError>;
}

/// A single binary DER certificate.
#[derive(Debug, Default, Clone, Copy)]
pub struct DerStrategy;

impl DecodeStrategy for DerStrategy {
    fn name(&self) -> &'static str {
        "DER"
    }

    fn decode(&self, input: &[u8]) -> Result<Vec<Certificate>, DecodeError> {
        parse_der(input).map(|cert| vec![cert])
    }
}

/// One or more PEM `CERTIFICATE` blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct PemStrategy;

impl DecodeStrategy for PemStrategy {
    fn name(&self) -> &'static str {
        "PEM"
    }

    fn decode(&self, input: &[u8]) -> Result<Vec<Certificate>, DecodeError> {
        parse_pem(input)
    }
}

/// Ordered list of decoding strategies.
pub struct Decoder {
    strategies: Vec<Box<dyn DecodeStrategy>>,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new(vec![Box::new(DerStrategy), Box::new(PemStrategy)])
    }
}

impl Decoder {
    pub fn new(strategies: Vec<Box<dyn DecodeStrategy>>) -> Self {
        Decoder { strategies }
    }

    /// Try each strategy in order; return the first success.
    ///
    /// When every strategy fails the error carries each strategy's reason.
    pub fn decode(&self, input: &[u8]) -> Result<Vec<Certificate>, DecodeError> {
        if input.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mut failures = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            match strategy.decode(input) {
                Ok(certs) if !certs.is_empty() => return Ok(certs),
                Ok(_) => failures.push((strategy.name(), DecodeError::NoCertificate)),
                Err(e) => failures.push((strategy.name(), e)),
            }
        }
        Err(DecodeError::AllStrategiesFailed(failures))
    }
}

/// Decode a certificate file's bytes with the default DER-then-PEM order.
pub fn decode_cert(input: &[u8]) -> Result<Vec<Certificate>, DecodeError> {
    Decoder::default().decode(input)
}

/// Parse every certificate block from PEM text.
///
/// Non-certificate blocks (keys, CRLs) are ignored. A block whose body does
/// not decode is skipped with a warning as long as at least one other block
/// decodes.
pub fn parse_pem(input: &[u8]) -> Result<Vec<Certificate>, DecodeError> {
    if !util::is_pem(input) && !input.windows(10).any(|w| w == b"-----BEGIN") {
        return Err(DecodeError::Pem("no PEM armor found".into()));
    }

    let mut certs = Vec::new();
    let mut first_error = None;

    for pem_result in Pem::iter_from_buffer(input) {
        match pem_result {
            Ok(pem) => {
                if pem.label != "CERTIFICATE"
                    && pem.label != "TRUSTED CERTIFICATE"
                    && pem.label != "X509 CERTIFICATE"
                {
                    log::debug!("skipping PEM block labelled {}", pem.label);
                    continue;
                }
                match parse_der(&pem.contents) {
                    Ok(cert) => certs.push(cert),
                    Err(e) => {
                        log::warn!("skipping undecodable PEM certificate block: {}", e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            Err(e) => {
                // Trailing garbage after valid blocks ends the bundle.
                if !certs.is_empty() {
                    break;
                }
                return Err(DecodeError::Pem(format!("{}", e)));
            }
        }
    }

    if certs.is_empty() {
        return Err(first_error.unwrap_or(DecodeError::NoCertificate));
    }
    Ok(certs)
}

/// Parse a certificate from DER format.
pub fn parse_der(input: &[u8]) -> Result<Certificate, DecodeError> {
    if input.is_empty() {
        return Err(DecodeError::Empty);
    }
    let (remaining, x509) =
        X509Certificate::from_der(input).map_err(|e| DecodeError::Der(format!("{}", e)))?;

    // Fingerprint only the certificate bytes, not any trailing data.
    let cert_len = input.len() - remaining.len();
    let cert_der = input.get(..cert_len).unwrap_or(input);
    build_certificate(&x509, cert_der)
}

fn build_certificate(x509: &X509Certificate, raw_der: &[u8]) -> Result<Certificate, DecodeError> {
    let tbs = &x509.tbs_certificate;

    let raw_version = tbs.version.0;
    if raw_version > 2 {
        return Err(DecodeError::UnsupportedVersion(raw_version + 1));
    }

    Ok(Certificate {
        version: raw_version + 1,
        // raw_serial() is the INTEGER content; read it as an unsigned magnitude.
        serial: BigUint::from_bytes_be(tbs.raw_serial()),
        signature_algorithm: format_sig_algorithm(&x509.signature_algorithm),
        issuer: build_dn(&tbs.issuer),
        subject: build_dn(&tbs.subject),
        not_before: build_instant(&tbs.validity.not_before)?,
        not_after: build_instant(&tbs.validity.not_after)?,
        public_key: build_public_key_info(&tbs.subject_pki),
        fingerprint: compute_fingerprint(raw_der),
    })
}

fn format_sig_algorithm(algo: &AlgorithmIdentifier) -> String {
    match algo.algorithm.to_id_string().as_str() {
        oid::MD5_WITH_RSA => "md5WithRSAEncryption".into(),
        oid::SHA1_WITH_RSA => "sha1WithRSAEncryption".into(),
        oid::RSASSA_PSS => "rsassaPss".into(),
        oid::SHA256_WITH_RSA => "sha256WithRSAEncryption".into(),
        oid::SHA384_WITH_RSA => "sha384WithRSAEncryption".into(),
        oid::SHA512_WITH_RSA => "sha512WithRSAEncryption".into(),
        oid::ECDSA_WITH_SHA1 => "ecdsa-with-SHA1".into(),
        oid::ECDSA_WITH_SHA256 => "ecdsa-with-SHA256".into(),
        oid::ECDSA_WITH_SHA384 => "ecdsa-with-SHA384".into(),
        oid::ECDSA_WITH_SHA512 => "ecdsa-with-SHA512".into(),
        oid::ED25519 => "Ed25519".into(),
        oid::ED448 => "Ed448".into(),
        other => other.to_string(),
    }
}

fn build_dn(name: &X509Name) -> DistinguishedName {
    let mut components = Vec::new();
    for rdn in name.iter() {
        for attr in rdn.iter() {
            let key = util::oid_short_name(&attr.attr_type().to_id_string());
            let value = match attr.as_str() {
                Ok(s) => s.to_string(),
                Err(_) => format!("#{}", hex::encode(attr.attr_value().as_bytes())),
            };
            components.push((key, value));
        }
    }
    DistinguishedName { components }
}

fn build_instant(asn1_time: &ASN1Time) -> Result<OffsetDateTime, DecodeError> {
    let ts = asn1_time.timestamp();
    OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|e| DecodeError::InvalidDate(format!("{}: {}", ts, e)))
}

fn build_public_key_info(spki: &SubjectPublicKeyInfo) -> PublicKeyInfo {
    let oid_str = spki.algorithm.algorithm.to_id_string();

    match oid_str.as_str() {
        oid::RSA_ENCRYPTION => {
            let key_size = match spki.parsed() {
                Ok(PublicKey::RSA(rsa)) => u32::try_from(rsa.key_size()).ok(),
                _ => None,
            };
            PublicKeyInfo {
                algorithm: "RSA".into(),
                key_size,
                curve: None,
            }
        }
        oid::EC_PUBLIC_KEY => {
            let curve = extract_ec_curve(&spki.algorithm);
            let key_size = match curve.as_str() {
                "P-256" => Some(256),
                "P-384" => Some(384),
                "P-521" => Some(521),
                _ => None,
            };
            PublicKeyInfo {
                algorithm: "EC".into(),
                key_size,
                curve: Some(curve),
            }
        }
        oid::ED25519 => PublicKeyInfo {
            algorithm: "Ed25519".into(),
            key_size: Some(256),
            curve: None,
        },
        oid::ED448 => PublicKeyInfo {
            algorithm: "Ed448".into(),
            key_size: Some(448),
            curve: None,
        },
        _ => PublicKeyInfo {
            algorithm: oid_str,
            key_size: None,
            curve: None,
        },
    }
}

fn extract_ec_curve(algo: &AlgorithmIdentifier) -> String {
    if let Some(params) = &algo.parameters {
        if let Ok(oid) = params.as_oid() {
            return match oid.to_id_string().as_str() {
                oid::CURVE_P256 => "P-256".into(),
                oid::CURVE_P384 => "P-384".into(),
                oid::CURVE_P521 => "P-521".into(),
                other => other.to_string(),
            };
        }
    }
    "unknown".into()
}
