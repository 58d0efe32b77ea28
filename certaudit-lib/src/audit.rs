//! Whole-pool analysis: build every chain, classify it, aggregate.

use crate::anchors::TrustAnchorTable;
use crate::chain::ChainBuilder;
use crate::classify::{ClassifyOptions, Outcome, TrustClassifier, TrustState};
use crate::fields::{Fingerprint, PublicKeyInfo};
use crate::pool::{CertificatePool, Role, RoleCounts};
use crate::util;
use rayon::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;

/// One link of a reported chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainLink {
    pub name: String,
    pub subject: String,
}

/// Everything reported about one pool entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertReport {
    pub name: String,
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    #[serde(serialize_with = "serialize_instant")]
    pub not_before: OffsetDateTime,
    #[serde(serialize_with = "serialize_instant")]
    pub not_after: OffsetDateTime,
    pub signature_algorithm: String,
    pub public_key: PublicKeyInfo,
    pub fingerprint: Fingerprint,
    pub role: Role,
    /// Leaf first.
    pub chain: Vec<ChainLink>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateCount {
    pub state: TrustState,
    pub count: usize,
    pub percent: f64,
}

/// Pool-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub trusted: usize,
    pub valid: usize,
    pub complete: usize,
    pub trusted_percent: f64,
    pub valid_percent: f64,
    pub complete_percent: f64,
    /// One entry per [`TrustState`], in [`TrustState::ALL`] order.
    pub by_state: Vec<StateCount>,
    pub roles: RoleCounts,
}

impl Summary {
    fn from_reports(reports: &[CertReport], roles: RoleCounts) -> Self {
        let total = reports.len();
        let trusted = reports.iter().filter(|r| r.outcome.is_trusted()).count();
        let valid = reports.iter().filter(|r| r.outcome.is_valid).count();
        let complete = reports.iter().filter(|r| r.outcome.chain_complete).count();

        let by_state = TrustState::ALL
            .iter()
            .map(|&state| {
                let count = reports.iter().filter(|r| r.outcome.trust == state).count();
                StateCount {
                    state,
                    count,
                    percent: percent(count, total),
                }
            })
            .collect();

        Summary {
            total,
            trusted,
            valid,
            complete,
            trusted_percent: percent(trusted, total),
            valid_percent: percent(valid, total),
            complete_percent: percent(complete, total),
            by_state,
            roles,
        }
    }

    /// Whether every certificate chains to a trust anchor. False for an
    /// empty pool.
    pub fn all_trusted(&self) -> bool {
        self.total > 0 && self.trusted == self.total
    }
}

/// `part / total * 100`, or 0 for an empty total.
fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

/// Result of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    /// Instant every certificate's validity was judged against.
    #[serde(serialize_with = "serialize_instant")]
    pub evaluated_at: OffsetDateTime,
    pub anchor_count: usize,
    pub whole_chain_validity: bool,
    /// In pool order.
    pub certificates: Vec<CertReport>,
    pub summary: Summary,
}

fn serialize_instant<S: serde::Serializer>(
    instant: &OffsetDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&util::format_iso8601(*instant))
}

/// Build and classify the chain of every pool entry.
///
/// Work is spread over the rayon pool; the reports keep pool order. The
/// evaluation instant is fixed before any certificate is looked at.
pub fn analyze(
    pool: &CertificatePool,
    anchors: &TrustAnchorTable,
    options: &ClassifyOptions,
) -> AuditReport {
    let builder = ChainBuilder::new(pool);
    let classifier = TrustClassifier::new(anchors, options);
    let roles = builder.roles();

    let certificates: Vec<CertReport> = pool
        .entries()
        .par_iter()
        .zip(roles.par_iter())
        .enumerate()
        .filter_map(|(idx, (entry, &role))| {
            let chain = builder.build(idx)?;
            let outcome = classifier.classify(&chain);
            let cert = &entry.cert;
            Some(CertReport {
                name: entry.name.clone(),
                subject: cert.subject_string(),
                issuer: cert.issuer_string(),
                serial: cert.serial_hex(),
                not_before: cert.not_before,
                not_after: cert.not_after,
                signature_algorithm: cert.signature_algorithm.clone(),
                public_key: cert.public_key.clone(),
                fingerprint: cert.fingerprint,
                role,
                chain: chain
                    .links()
                    .iter()
                    .map(|l| ChainLink {
                        name: l.name.clone(),
                        subject: l.cert.subject_string(),
                    })
                    .collect(),
                outcome,
            })
        })
        .collect();

    let summary = Summary::from_reports(&certificates, builder.role_counts());
    log::info!(
        "analysed {} certificates: {} trusted, {} valid",
        summary.total,
        summary.trusted,
        summary.valid
    );

    AuditReport {
        evaluated_at: classifier.now(),
        anchor_count: anchors.len(),
        whole_chain_validity: options.check_whole_chain,
        certificates,
        summary,
    }
}
