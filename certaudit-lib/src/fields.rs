//! Certificate data types consumed by the pool, chain builder and classifier.

use crate::util;
use num_bigint::BigUint;
use serde::{Serialize, Serializer};
use time::OffsetDateTime;

/// SHA-256 digest of a certificate's DER encoding.
///
/// Used as the identity key for de-duplication and trust anchor lookup.
/// Equal encodings always produce equal fingerprints; a matching fingerprint
/// says nothing about who signed the certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Fingerprint(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Colon-separated uppercase hex (e.g., "AB:CD:EF:...").
    pub fn to_hex(&self) -> String {
        util::hex_colon_upper(&self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", hex::encode(self.0))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// A decoded X.509 certificate, reduced to the fields the audit needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Certificate {
    /// Certificate version (1, 2, or 3).
    pub version: u32,
    /// Serial number as an unsigned integer.
    #[serde(serialize_with = "serialize_serial")]
    pub serial: BigUint,
    /// Signature algorithm name.
    pub signature_algorithm: String,
    /// Issuer distinguished name.
    pub issuer: DistinguishedName,
    /// Subject distinguished name.
    pub subject: DistinguishedName,
    /// Validity start.
    #[serde(serialize_with = "serialize_instant")]
    pub not_before: OffsetDateTime,
    /// Validity end.
    #[serde(serialize_with = "serialize_instant")]
    pub not_after: OffsetDateTime,
    /// Public key summary (display only).
    pub public_key: PublicKeyInfo,
    /// SHA-256 over the DER encoding.
    pub fingerprint: Fingerprint,
}

/// Distinguished name with ordered components.
///
/// Equality is structural: same attributes, same values, same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DistinguishedName {
    /// Ordered list of (attribute_type, value) pairs.
    /// Attribute types use short names where known (e.g., "CN", "O", "C").
    /// Values that are not strings are kept as `#` followed by hex.
    pub components: Vec<(String, String)>,
}

impl DistinguishedName {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        DistinguishedName {
            components: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// First CN value, if any.
    pub fn common_name(&self) -> Option<&str> {
        self.components
            .iter()
            .find(|(k, _)| k == "CN")
            .map(|(_, v)| v.as_str())
    }

    /// Format as a comma-separated one-line string matching OpenSSL's default format.
    /// Example: "C = US, O = Org, CN = example.com"
    ///
    /// Values containing commas, equals signs, or backslashes are escaped
    /// to prevent ambiguous output.
    pub fn to_oneline(&self) -> String {
        let mut result = String::new();
        for (i, (k, v)) in self.components.iter().enumerate() {
            if i > 0 {
                result.push_str(", ");
            }
            result.push_str(k);
            result.push_str(" = ");
            for ch in v.chars() {
                match ch {
                    '\\' => result.push_str("\\\\"),
                    ',' => result.push_str("\\,"),
                    '=' => result.push_str("\\="),
                    _ => result.push(ch),
                }
            }
        }
        result
    }
}

impl std::fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_oneline())
    }
}

/// Public key summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicKeyInfo {
    /// Algorithm name: "RSA", "EC", "Ed25519", etc.
    pub algorithm: String,
    /// Key size in bits (e.g., 2048 for RSA, 256 for P-256).
    pub key_size: Option<u32>,
    /// Named curve for EC keys (e.g., "P-256", "P-384").
    pub curve: Option<String>,
}

impl std::fmt::Display for PublicKeyInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.algorithm)?;
        if let Some(bits) = self.key_size {
            write!(f, " ({} bit)", bits)?;
        }
        if let Some(curve) = &self.curve {
            write!(f, " [{}]", curve)?;
        }
        Ok(())
    }
}

impl Certificate {
    /// A certificate is self-signed when its subject equals its issuer.
    ///
    /// Structural name equality only; no signature is checked.
    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }

    /// Return the subject as a one-line string.
    pub fn subject_string(&self) -> String {
        self.subject.to_oneline()
    }

    /// Return the issuer as a one-line string.
    pub fn issuer_string(&self) -> String {
        self.issuer.to_oneline()
    }

    /// Serial number in lowercase hex without separators (e.g., "1a2b").
    pub fn serial_hex(&self) -> String {
        self.serial.to_str_radix(16)
    }

    /// Return the notBefore date in OpenSSL format.
    pub fn not_before_string(&self) -> String {
        util::format_openssl_date(self.not_before)
    }

    /// Return the notAfter date in OpenSSL format.
    pub fn not_after_string(&self) -> String {
        util::format_openssl_date(self.not_after)
    }

    /// `not_before <= at <= not_after`.
    pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Whole days from `at` until `not_after`, or 0 when not valid at `at`.
    pub fn days_remaining(&self, at: OffsetDateTime) -> i64 {
        if self.is_valid_at(at) {
            (self.not_after - at).whole_days()
        } else {
            0
        }
    }
}

fn serialize_serial<S: Serializer>(serial: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&serial.to_str_radix(16))
}

fn serialize_instant<S: Serializer>(
    instant: &OffsetDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&util::format_iso8601(*instant))
}
