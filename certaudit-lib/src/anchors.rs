//! Trust anchor loading and the fingerprint-indexed anchor table.
//!
//! Anchors come from one or more [`AnchorSource`]s: the system bundle found
//! the way OpenSSL finds it, an explicit PEM file, or a directory of
//! certificate files. Sources load independently; a failing source is
//! logged and reported but never stops the others.

use crate::decode::{decode_cert, parse_pem};
use crate::fields::{Certificate, DistinguishedName, Fingerprint};
use crate::pool::is_cert_file;
use crate::AuditError;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Well-known CA bundle file paths, in order of preference.
pub(crate) const KNOWN_CA_BUNDLE_PATHS: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt", // Debian/Ubuntu
    "/etc/pki/tls/certs/ca-bundle.crt",   // RHEL/CentOS/Fedora
    "/etc/ssl/ca-bundle.pem",             // openSUSE
    "/etc/ssl/cert.pem",                  // macOS, Alpine
];

/// Well-known CA certificate directory paths.
pub(crate) const KNOWN_CA_DIR_PATHS: &[&str] = &["/etc/ssl/certs"];

/// A provider of trusted root certificates.
pub trait AnchorSource: Send + Sync {
    /// Short label used in logs and the `anchors` listing.
    fn name(&self) -> String;

    fn load(&self) -> Result<Vec<Certificate>, AuditError>;
}

/// The operating system's CA store.
///
/// Searched in the same order OpenSSL uses:
/// 1. `SSL_CERT_FILE` environment variable
/// 2. Bundle path discovered by `openssl-probe`
/// 3. Well-known bundle file paths
/// 4. `SSL_CERT_DIR` environment variable
/// 5. Directory discovered by `openssl-probe`
/// 6. Well-known certificate directories
///
/// The first location that yields at least one certificate wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBundle;

impl AnchorSource for SystemBundle {
    fn name(&self) -> String {
        "system".to_string()
    }

    fn load(&self) -> Result<Vec<Certificate>, AuditError> {
        if let Some(bundle_path) = find_system_ca_bundle() {
            match read_pem_bundle(&bundle_path) {
                Ok(certs) if !certs.is_empty() => {
                    log::info!(
                        "loaded {} system anchors from {}",
                        certs.len(),
                        bundle_path.display()
                    );
                    return Ok(certs);
                }
                Ok(_) => log::debug!("{}: no certificates", bundle_path.display()),
                Err(e) => log::debug!("{}: {}", bundle_path.display(), e),
            }
        }

        let probe = openssl_probe::probe();
        let dir_candidates = std::env::var("SSL_CERT_DIR")
            .ok()
            .map(PathBuf::from)
            .into_iter()
            .chain(probe.cert_dir.iter().cloned())
            .chain(KNOWN_CA_DIR_PATHS.iter().map(PathBuf::from));

        for dir in dir_candidates {
            if let Ok(certs) = read_cert_dir(&dir) {
                if !certs.is_empty() {
                    log::info!("loaded {} system anchors from {}", certs.len(), dir.display());
                    return Ok(certs);
                }
            }
        }

        Err(AuditError::AnchorSource {
            source_name: self.name(),
            message: "no system trust store found".into(),
        })
    }
}

/// A PEM bundle file (`--CAfile`).
#[derive(Debug, Clone)]
pub struct PemFile(pub PathBuf);

impl AnchorSource for PemFile {
    fn name(&self) -> String {
        format!("file:{}", self.0.display())
    }

    fn load(&self) -> Result<Vec<Certificate>, AuditError> {
        let certs = read_pem_bundle(&self.0)?;
        if certs.is_empty() {
            return Err(AuditError::AnchorSource {
                source_name: self.name(),
                message: "no certificates found".into(),
            });
        }
        Ok(certs)
    }
}

/// A directory of certificate files (`--CApath`), PEM or DER.
#[derive(Debug, Clone)]
pub struct CertDirectory(pub PathBuf);

impl AnchorSource for CertDirectory {
    fn name(&self) -> String {
        format!("dir:{}", self.0.display())
    }

    fn load(&self) -> Result<Vec<Certificate>, AuditError> {
        if !self.0.is_dir() {
            return Err(AuditError::NotADirectory(self.0.clone()));
        }
        read_cert_dir(&self.0)
    }
}

/// Anchors already in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    pub label: String,
    pub certs: Vec<Certificate>,
}

impl AnchorSource for MemorySource {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn load(&self) -> Result<Vec<Certificate>, AuditError> {
        Ok(self.certs.clone())
    }
}

/// What happened when one source was loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub name: String,
    /// Certificates the source produced.
    pub loaded: usize,
    /// Certificates new to the table (not already supplied by an earlier
    /// source).
    pub added: usize,
    pub error: Option<String>,
}

/// Trusted roots keyed by SHA-256 fingerprint.
///
/// Built once before classification and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TrustAnchorTable {
    by_fingerprint: HashMap<Fingerprint, Certificate>,
}

impl TrustAnchorTable {
    pub fn new() -> Self {
        TrustAnchorTable::default()
    }

    /// Add one anchor. An existing entry with the same fingerprint is kept;
    /// returns whether `cert` was new.
    pub fn insert(&mut self, cert: Certificate) -> bool {
        match self.by_fingerprint.entry(cert.fingerprint) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(cert);
                true
            }
        }
    }

    /// Add every certificate, returning how many were new.
    pub fn extend(&mut self, certs: impl IntoIterator<Item = Certificate>) -> usize {
        let mut added = 0;
        for cert in certs {
            if self.insert(cert) {
                added += 1;
            }
        }
        added
    }

    /// Union with `other`; entries already present here win.
    pub fn merge(&mut self, other: TrustAnchorTable) -> usize {
        self.extend(other.by_fingerprint.into_values())
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.by_fingerprint.contains_key(fingerprint)
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Certificate> {
        self.by_fingerprint.get(fingerprint)
    }

    /// An anchor whose subject is `name`. With several, the one with the
    /// lowest fingerprint.
    pub fn find_by_subject(&self, name: &DistinguishedName) -> Option<&Certificate> {
        self.by_fingerprint
            .values()
            .filter(|c| &c.subject == name)
            .min_by_key(|c| c.fingerprint)
    }

    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }

    /// Anchors in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.by_fingerprint.values()
    }

    /// Load every source in order and merge the results.
    ///
    /// Earlier sources win on fingerprint collision. A source that fails is
    /// logged and recorded in its [`SourceStatus`]; the remaining sources
    /// still load.
    pub fn from_sources(sources: &[Box<dyn AnchorSource>]) -> (Self, Vec<SourceStatus>) {
        let mut table = TrustAnchorTable::new();
        let mut statuses = Vec::with_capacity(sources.len());

        for source in sources {
            let name = source.name();
            let status = match source.load() {
                Ok(certs) => {
                    let loaded = certs.len();
                    let added = table.extend(certs);
                    log::info!("{}: {} anchors ({} new)", name, loaded, added);
                    SourceStatus {
                        name,
                        loaded,
                        added,
                        error: None,
                    }
                }
                Err(e) => {
                    log::warn!("trust anchor source {} unavailable: {}", name, e);
                    SourceStatus {
                        name,
                        loaded: 0,
                        added: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            statuses.push(status);
        }

        log::info!("trust anchor table holds {} certificates", table.len());
        (table, statuses)
    }
}

/// Find the system CA bundle path (same location OpenSSL uses).
///
/// Checks, in order:
/// 1. `SSL_CERT_FILE` environment variable
/// 2. Path discovered by `openssl-probe`
/// 3. Well-known bundle file paths ([`KNOWN_CA_BUNDLE_PATHS`])
pub fn find_system_ca_bundle() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("SSL_CERT_FILE") {
        let p = PathBuf::from(&path);
        if p.exists() {
            return Some(p);
        }
    }

    let probe = openssl_probe::probe();
    if let Some(file) = probe.cert_file {
        if file.exists() {
            return Some(file);
        }
    }

    KNOWN_CA_BUNDLE_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn read_pem_bundle(path: &Path) -> Result<Vec<Certificate>, AuditError> {
    let data = std::fs::read(path).map_err(|e| {
        AuditError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    Ok(parse_pem(&data)?)
}

/// Every decodable certificate file directly inside `dir`; bad files are
/// skipped.
fn read_cert_dir(dir: &Path) -> Result<Vec<Certificate>, AuditError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        AuditError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", dir.display(), e),
        ))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_cert_file(p))
        .collect();
    paths.sort();

    let mut certs = Vec::new();
    for path in paths {
        let Ok(data) = std::fs::read(&path) else {
            continue;
        };
        match decode_cert(&data) {
            Ok(found) => certs.extend(found),
            Err(e) => log::debug!("{}: not an anchor ({})", path.display(), e),
        }
    }
    Ok(certs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::testutil::{cert, root};

    fn memory(label: &str, certs: Vec<Certificate>) -> Box<dyn AnchorSource> {
        Box::new(MemorySource {
            label: label.to_string(),
            certs,
        })
    }

    struct Broken;

    impl AnchorSource for Broken {
        fn name(&self) -> String {
            "broken".into()
        }

        fn load(&self) -> Result<Vec<Certificate>, AuditError> {
            Err(AuditError::AnchorSource {
                source_name: self.name(),
                message: "unreachable".into(),
            })
        }
    }

    #[test]
    fn insert_keeps_first_on_collision() {
        let mut table = TrustAnchorTable::new();
        let first = root("First", 7);
        // Same fingerprint, different content.
        let second = root("Second", 7);
        assert!(table.insert(first.clone()));
        assert!(!table.insert(second));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&first.fingerprint), Some(&first));
    }

    #[test]
    fn disjoint_union_is_order_independent() {
        let a = vec![root("A1", 1), root("A2", 2)];
        let b = vec![root("B1", 3)];

        let (ab, _) = TrustAnchorTable::from_sources(&[
            memory("a", a.clone()),
            memory("b", b.clone()),
        ]);
        let (ba, _) = TrustAnchorTable::from_sources(&[memory("b", b), memory("a", a)]);

        let mut left: Vec<_> = ab.iter().map(|c| c.fingerprint).collect();
        let mut right: Vec<_> = ba.iter().map(|c| c.fingerprint).collect();
        left.sort();
        right.sort();
        assert_eq!(left, right);
        assert_eq!(ab.len(), 3);
    }

    #[test]
    fn earlier_source_wins_collision() {
        let early = root("Early", 9);
        let late = root("Late", 9);
        let (table, statuses) = TrustAnchorTable::from_sources(&[
            memory("early", vec![early.clone()]),
            memory("late", vec![late]),
        ]);
        assert_eq!(table.get(&early.fingerprint), Some(&early));
        assert_eq!(statuses[1].loaded, 1);
        assert_eq!(statuses[1].added, 0);
    }

    #[test]
    fn failing_source_does_not_stop_the_rest() {
        let (table, statuses) = TrustAnchorTable::from_sources(&[
            Box::new(Broken),
            memory("good", vec![root("Good", 1)]),
        ]);
        assert_eq!(table.len(), 1);
        assert!(statuses[0].error.is_some());
        assert!(statuses[1].error.is_none());
    }

    #[test]
    fn merge_counts_new_entries() {
        let mut left = TrustAnchorTable::new();
        left.insert(root("A", 1));
        let mut right = TrustAnchorTable::new();
        right.insert(root("A", 1));
        right.insert(cert("B", "B", 2));
        assert_eq!(left.merge(right), 1);
        assert_eq!(left.len(), 2);
    }

    #[test]
    fn find_by_subject_is_deterministic() {
        let mut table = TrustAnchorTable::new();
        table.insert(root("Shared", 5));
        table.insert(root("Shared", 3));
        table.insert(root("Other", 1));

        let found = table.find_by_subject(&root("Shared", 0).subject).unwrap();
        assert_eq!(found.fingerprint, root("Shared", 3).fingerprint);
        assert!(table.find_by_subject(&root("Absent", 0).subject).is_none());
    }

    #[test]
    fn missing_directory_source_errors() {
        let src = CertDirectory(PathBuf::from("/definitely/not/here"));
        assert!(matches!(src.load(), Err(AuditError::NotADirectory(_))));
    }

    #[test]
    fn pem_file_without_certificates_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pem");
        std::fs::write(&path, b"").unwrap();
        assert!(PemFile(path).load().is_err());
    }
}
