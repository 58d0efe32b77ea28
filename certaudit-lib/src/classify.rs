//! Trust and validity verdicts for built chains.

use crate::anchors::TrustAnchorTable;
use crate::chain::{Chain, ChainEnd};
use serde::Serialize;
use time::OffsetDateTime;

/// Trust classification of one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    /// Lone self-signed certificate present in the anchor table.
    TrustedSelfSignedRoot,
    /// Lone self-signed certificate absent from the anchor table.
    UntrustedSelfSignedRoot,
    /// Not self-signed and no issuer in the pool.
    NoIssuerFound,
    /// Reached a self-signed root that is a trust anchor.
    CompleteTrustedRoot,
    /// Reached a self-signed root that is not a trust anchor.
    CompleteUntrustedRoot,
    /// Has at least one issuer but never reached a self-signed root.
    IncompleteChain,
}

impl TrustState {
    /// Every state, in report order.
    pub const ALL: [TrustState; 6] = [
        TrustState::TrustedSelfSignedRoot,
        TrustState::CompleteTrustedRoot,
        TrustState::UntrustedSelfSignedRoot,
        TrustState::CompleteUntrustedRoot,
        TrustState::NoIssuerFound,
        TrustState::IncompleteChain,
    ];

    /// Ends at a trust anchor.
    pub fn is_trusted(self) -> bool {
        matches!(
            self,
            TrustState::TrustedSelfSignedRoot | TrustState::CompleteTrustedRoot
        )
    }

    /// Ends at a self-signed certificate, trusted or not.
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            TrustState::TrustedSelfSignedRoot
                | TrustState::UntrustedSelfSignedRoot
                | TrustState::CompleteTrustedRoot
                | TrustState::CompleteUntrustedRoot
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            TrustState::TrustedSelfSignedRoot => "trusted self-signed root",
            TrustState::UntrustedSelfSignedRoot => "self-signed, not a trust anchor",
            TrustState::NoIssuerFound => "chain incomplete, no issuer found",
            TrustState::CompleteTrustedRoot => "complete chain, trusted root",
            TrustState::CompleteUntrustedRoot => "complete chain, untrusted root",
            TrustState::IncompleteChain => "incomplete chain",
        }
    }
}

impl std::fmt::Display for TrustState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Options for classification.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyOptions {
    /// Evaluation instant; the current time when `None`.
    pub at_time: Option<OffsetDateTime>,
    /// Require every link in the chain to be within its validity window.
    pub check_whole_chain: bool,
}

/// Verdict for one certificate. Created once per run, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub chain_length: usize,
    pub chain_complete: bool,
    pub trust: TrustState,
    pub reason: String,
    pub is_valid: bool,
    /// Whole days until expiry; 0 when not valid.
    pub days_remaining: i64,
    pub chain_end: ChainEnd,
    /// Subject of a trust anchor named as the missing issuer. The chain
    /// would complete if that anchor were added to the pool.
    pub issuer_anchor: Option<String>,
}

impl Outcome {
    pub fn is_trusted(&self) -> bool {
        self.trust.is_trusted()
    }
}

/// Classifies chains against one anchor table at one fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct TrustClassifier<'a> {
    anchors: &'a TrustAnchorTable,
    now: OffsetDateTime,
    check_whole_chain: bool,
}

impl<'a> TrustClassifier<'a> {
    /// Resolves the evaluation instant once, so every chain classified by
    /// this value is judged against the same `now`.
    pub fn new(anchors: &'a TrustAnchorTable, options: &ClassifyOptions) -> Self {
        TrustClassifier {
            anchors,
            now: options.at_time.unwrap_or_else(OffsetDateTime::now_utc),
            check_whole_chain: options.check_whole_chain,
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        self.now
    }

    pub fn classify(&self, chain: &Chain<'_>) -> Outcome {
        let (trust, mut reason) = self.trust_of(chain);
        let (is_valid, days_remaining) = self.validity_of(chain);
        let issuer_anchor = self.issuer_anchor(chain, trust);
        if let Some(anchor) = &issuer_anchor {
            reason.push_str(&format!(
                "; trust anchor {} has that name, add it to the folder",
                anchor
            ));
        }
        Outcome {
            chain_length: chain.len(),
            chain_complete: trust.is_complete(),
            trust,
            reason,
            is_valid,
            days_remaining,
            chain_end: chain.end(),
            issuer_anchor,
        }
    }

    /// The anchor a chain stops short of, when its last certificate's issuer
    /// is missing from the pool but present in the anchor table.
    fn issuer_anchor(&self, chain: &Chain<'_>, trust: TrustState) -> Option<String> {
        let missing = match trust {
            TrustState::NoIssuerFound => true,
            TrustState::IncompleteChain => {
                matches!(chain.end(), ChainEnd::MissingIssuer | ChainEnd::ReachedRoot)
            }
            _ => false,
        };
        if !missing {
            return None;
        }
        let anchor = self.anchors.find_by_subject(&chain.root().issuer)?;
        Some(anchor.subject_string())
    }

    fn trust_of(&self, chain: &Chain<'_>) -> (TrustState, String) {
        let root = chain.root();
        let anchored = self.anchors.contains(&root.fingerprint);

        if chain.len() == 1 {
            return if !root.is_self_signed() {
                (
                    TrustState::NoIssuerFound,
                    format!("no certificate in the pool is named {}", root.issuer_string()),
                )
            } else if anchored {
                (
                    TrustState::TrustedSelfSignedRoot,
                    "self-signed and present in the trust anchor table".to_string(),
                )
            } else {
                (
                    TrustState::UntrustedSelfSignedRoot,
                    "self-signed but not in the trust anchor table".to_string(),
                )
            };
        }

        if root.is_self_signed() {
            let root_name = root.subject_string();
            if anchored {
                (
                    TrustState::CompleteTrustedRoot,
                    format!("chains to trusted root {}", root_name),
                )
            } else {
                (
                    TrustState::CompleteUntrustedRoot,
                    format!("chains to root {} which is not a trust anchor", root_name),
                )
            }
        } else {
            let why = match chain.end() {
                ChainEnd::Cycle => format!("issuer cycle at {}", root.subject_string()),
                ChainEnd::DepthExceeded => {
                    format!("gave up after {} issuers", chain.len().saturating_sub(1))
                }
                ChainEnd::MissingIssuer | ChainEnd::ReachedRoot => {
                    format!("issuer {} not found in pool", root.issuer_string())
                }
            };
            (
                TrustState::IncompleteChain,
                format!("terminates without reaching a root: {}", why),
            )
        }
    }

    fn validity_of(&self, chain: &Chain<'_>) -> (bool, i64) {
        let leaf = chain.leaf();
        if !self.check_whole_chain {
            return (leaf.is_valid_at(self.now), leaf.days_remaining(self.now));
        }

        if chain.certs().all(|c| c.is_valid_at(self.now)) {
            let days = chain
                .certs()
                .map(|c| c.days_remaining(self.now))
                .min()
                .unwrap_or(0);
            (true, days)
        } else {
            (false, 0)
        }
    }
}
