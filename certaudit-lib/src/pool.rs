//! The certificate pool: every decoded certificate of one analysis run, in
//! a fixed order, plus the root/intermediate/leaf classification pass.

use crate::decode::{DecodeError, Decoder};
use crate::fields::{Certificate, DistinguishedName};
use crate::AuditError;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Maximum file size read into the pool (10 MiB).
const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Whether a path has a certificate file extension.
///
/// Matches `.pem`, `.crt`, `.cer`, `.der` (case-insensitive) and OpenSSL
/// hash-linked files (`XXXXXXXX.N` where the extension is a single digit).
pub fn is_cert_file(path: &Path) -> bool {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e,
        None => return false,
    };
    ["pem", "crt", "cer", "der"]
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
        || (ext.len() == 1 && ext.bytes().next().is_some_and(|b| b.is_ascii_digit()))
}

/// Find all certificate files in a directory, sorted by path.
///
/// Symbolic links are followed, so OpenSSL hash links count as files.
pub fn find_cert_files(dir: &Path, recurse: bool) -> Vec<PathBuf> {
    scan_cert_files(dir, recurse).0
}

/// Like [`find_cert_files`], but also returns the entries the walk could
/// not visit (dangling links, unreadable sub-directories).
fn scan_cert_files(dir: &Path, recurse: bool) -> (Vec<PathBuf>, Vec<SkippedFile>) {
    let walker = walkdir::WalkDir::new(dir).follow_links(true);
    let walker = if recurse { walker } else { walker.max_depth(1) };

    let mut files = Vec::new();
    let mut unreadable = Vec::new();
    for entry in walker {
        match entry {
            Ok(e) => {
                if e.file_type().is_file() && is_cert_file(e.path()) {
                    files.push(e.into_path());
                }
            }
            Err(err) => {
                let path = err.path().unwrap_or(dir);
                // A dangling link surfaces here under its own name.
                if path.is_dir() || is_cert_file(path) {
                    unreadable.push(SkippedFile {
                        name: display_name(dir, path),
                        reason: format!("walk error: {}", err),
                    });
                }
            }
        }
    }
    files.sort();
    unreadable.sort_by(|a, b| a.name.cmp(&b.name));
    (files, unreadable)
}

/// Options for [`CertificatePool::load_dir`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Descend into sub-directories.
    pub recurse: bool,
}

/// One certificate in the pool and the name it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    /// File name relative to the loaded directory; `file[i]` for the i-th
    /// certificate of a multi-certificate file.
    pub name: String,
    pub cert: Certificate,
}

/// A file that was found but contributed no certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub name: String,
    pub reason: String,
}

/// File-level statistics from loading a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Certificate files found, including ones the walk could not open.
    pub files_processed: usize,
    /// Files that yielded at least one certificate.
    pub files_decoded: usize,
    /// Files that were unreadable or undecodable.
    pub skipped: Vec<SkippedFile>,
}

/// Position of a certificate in the pool's issuance graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Self-signed.
    Root,
    /// Not self-signed, and named as issuer by another pool certificate.
    Intermediate,
    /// Issued nothing else in the pool.
    Leaf,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Root => "root",
            Role::Intermediate => "intermediate",
            Role::Leaf => "leaf",
        };
        f.write_str(s)
    }
}

/// How many certificates hold each [`Role`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoleCounts {
    pub roots: usize,
    pub intermediates: usize,
    pub leaves: usize,
}

/// Ordered `(name, certificate)` pairs for one analysis run.
///
/// Order is insertion order and is preserved through every derived result,
/// so reports are reproducible.
#[derive(Debug, Clone, Default)]
pub struct CertificatePool {
    entries: Vec<PoolEntry>,
}

impl CertificatePool {
    pub fn new() -> Self {
        CertificatePool::default()
    }

    pub fn from_entries(entries: Vec<PoolEntry>) -> Self {
        CertificatePool { entries }
    }

    pub fn push(&mut self, name: impl Into<String>, cert: Certificate) {
        self.entries.push(PoolEntry {
            name: name.into(),
            cert,
        });
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&PoolEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PoolEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load every certificate file in `dir`.
    ///
    /// Files are read and decoded in parallel; the pool keeps sorted path
    /// order. Unreadable or undecodable files are recorded in the
    /// [`LoadReport`] and never abort the load.
    pub fn load_dir(dir: &Path, options: &LoadOptions) -> Result<(Self, LoadReport), AuditError> {
        if !dir.is_dir() {
            return Err(AuditError::NotADirectory(dir.to_path_buf()));
        }

        let (files, unreadable) = scan_cert_files(dir, options.recurse);
        log::info!("found {} certificate files in {}", files.len(), dir.display());
        for skipped in &unreadable {
            log::warn!("{}: skipped ({})", skipped.name, skipped.reason);
        }

        let decoder = Decoder::default();
        let decoded: Vec<(String, Result<Vec<Certificate>, String>)> = files
            .par_iter()
            .map(|path| {
                let name = display_name(dir, path);
                let result = read_file(path).and_then(|data| {
                    decoder.decode(&data).map_err(|e: DecodeError| e.to_string())
                });
                (name, result)
            })
            .collect();

        let mut pool = CertificatePool::new();
        let mut report = LoadReport {
            files_processed: decoded.len() + unreadable.len(),
            files_decoded: 0,
            skipped: unreadable,
        };

        for (name, result) in decoded {
            match result {
                Ok(certs) => {
                    report.files_decoded += 1;
                    log::debug!("{}: decoded {} certificate(s)", name, certs.len());
                    let multi = certs.len() > 1;
                    for (i, cert) in certs.into_iter().enumerate() {
                        let entry_name = if multi {
                            format!("{}[{}]", name, i)
                        } else {
                            name.clone()
                        };
                        pool.push(entry_name, cert);
                    }
                }
                Err(reason) => {
                    log::warn!("{}: skipped ({})", name, reason);
                    report.skipped.push(SkippedFile { name, reason });
                }
            }
        }

        log::info!(
            "pool holds {} certificates from {}/{} files",
            pool.len(),
            report.files_decoded,
            report.files_processed
        );
        Ok((pool, report))
    }

    /// Classify every entry as root, intermediate or leaf.
    ///
    /// The returned vector is index-aligned with [`entries`](Self::entries).
    pub fn roles(&self) -> Vec<Role> {
        // A non-root never names itself as issuer, so "some other
        // certificate" reduces to "some certificate" here.
        let issuers: HashSet<&DistinguishedName> =
            self.entries.iter().map(|e| &e.cert.issuer).collect();

        self.entries
            .iter()
            .map(|e| {
                if e.cert.is_self_signed() {
                    Role::Root
                } else if issuers.contains(&e.cert.subject) {
                    Role::Intermediate
                } else {
                    Role::Leaf
                }
            })
            .collect()
    }

    pub fn role_counts(&self) -> RoleCounts {
        count_roles(&self.roles())
    }
}

pub(crate) fn count_roles(roles: &[Role]) -> RoleCounts {
    let mut counts = RoleCounts::default();
    for role in roles {
        match role {
            Role::Root => counts.roots += 1,
            Role::Intermediate => counts.intermediates += 1,
            Role::Leaf => counts.leaves += 1,
        }
    }
    counts
}

fn display_name(dir: &Path, path: &Path) -> String {
    path.strip_prefix(dir)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn read_file(path: &Path) -> Result<Vec<u8>, String> {
    let meta = std::fs::metadata(path).map_err(|e| format!("stat error: {}", e))?;
    if meta.len() > MAX_FILE_BYTES {
        return Err(format!(
            "file too large ({} bytes, max {} bytes)",
            meta.len(),
            MAX_FILE_BYTES
        ));
    }
    std::fs::read(path).map_err(|e| format!("read error: {}", e))
}
