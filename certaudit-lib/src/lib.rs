//! certaudit-lib: chain reconstruction and trust classification for a pool
//! of X.509 certificates.
//!
//! Takes an unordered set of certificate files (roots, intermediates and
//! leaves mixed together), rebuilds the issuer/subject graph from name
//! matching alone, walks every certificate up towards a root and labels the
//! result against a fingerprint-indexed table of trust anchors.
//!
//! Trust is inferred from subject/issuer names and SHA-256 fingerprints
//! only. Signatures are never checked.

mod anchors;
mod audit;
mod chain;
mod classify;
mod decode;
mod display;
mod fields;
mod fingerprint;
mod oid;
mod pool;
mod util;

pub use anchors::{
    find_system_ca_bundle, AnchorSource, CertDirectory, MemorySource, PemFile, SourceStatus,
    SystemBundle, TrustAnchorTable,
};
pub use audit::{analyze, AuditReport, CertReport, ChainLink, StateCount, Summary};
pub use chain::{build_all_chains, build_chain, Chain, ChainBuilder, ChainEnd, MAX_CHAIN_HOPS};
pub use classify::{ClassifyOptions, Outcome, TrustClassifier, TrustState};
pub use decode::{
    decode_cert, parse_der, parse_pem, DecodeError, DecodeStrategy, Decoder, DerStrategy,
    PemStrategy,
};
pub use display::{display_text, to_json, TextOptions};
pub use fields::{Certificate, DistinguishedName, Fingerprint, PublicKeyInfo};
pub use fingerprint::compute_fingerprint;
pub use pool::{
    find_cert_files, is_cert_file, CertificatePool, LoadOptions, LoadReport, PoolEntry, Role,
    RoleCounts, SkippedFile,
};

/// Errors returned by certaudit-lib.
///
/// Incomplete chains and untrusted roots are not errors; they are reported
/// as [`TrustState`] values.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to decode certificate: {0}")]
    Decode(#[from] DecodeError),

    #[error("Not a directory: {0}")]
    NotADirectory(std::path::PathBuf),

    #[error("Trust anchor source '{source_name}' failed: {message}")]
    AnchorSource {
        source_name: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
