//! Chain reconstruction by subject/issuer name matching within the pool.
//!
//! Every certificate is walked towards a root by repeatedly looking up a
//! pool certificate whose subject equals the current issuer. Only roots and
//! intermediates are issuer candidates. The walk is bounded and never
//! revisits a fingerprint, so malformed or cyclic pools still terminate.

use crate::fields::{Certificate, DistinguishedName, Fingerprint};
use crate::pool::{count_roles, CertificatePool, PoolEntry, Role, RoleCounts};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

/// Maximum number of issuer hops from the starting certificate.
///
/// A safety bound against malformed input, not a protocol limit. A chain
/// therefore never holds more than `MAX_CHAIN_HOPS + 1` certificates.
pub const MAX_CHAIN_HOPS: usize = 10;

/// Why a chain walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainEnd {
    /// The last certificate is self-signed.
    ReachedRoot,
    /// No pool certificate has the current issuer as its subject.
    MissingIssuer,
    /// The only matching issuers are already in the chain.
    Cycle,
    /// [`MAX_CHAIN_HOPS`] hops were taken without reaching a root.
    DepthExceeded,
}

impl std::fmt::Display for ChainEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChainEnd::ReachedRoot => "reached a self-signed root",
            ChainEnd::MissingIssuer => "no issuer found in pool",
            ChainEnd::Cycle => "issuer cycle detected",
            ChainEnd::DepthExceeded => "hop limit reached",
        };
        f.write_str(s)
    }
}

/// An issuance path through the pool, starting at the certificate under
/// analysis and ending at the last issuer found.
///
/// Never empty; no fingerprint appears twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain<'a> {
    links: Vec<&'a PoolEntry>,
    end: ChainEnd,
}

impl<'a> Chain<'a> {
    /// Pool entries from the analysed certificate up to the last issuer.
    pub fn links(&self) -> &[&'a PoolEntry] {
        &self.links
    }

    pub fn certs(&self) -> impl Iterator<Item = &'a Certificate> + '_ {
        self.links.iter().map(|e| &e.cert)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Always false; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The certificate the walk started from.
    // links always holds the starting entry
    #[allow(clippy::indexing_slicing)]
    pub fn leaf(&self) -> &'a Certificate {
        &self.links[0].cert
    }

    /// The last certificate reached.
    #[allow(clippy::indexing_slicing)]
    pub fn root(&self) -> &'a Certificate {
        &self.links[self.links.len() - 1].cert
    }

    pub fn end(&self) -> ChainEnd {
        self.end
    }

    /// Subjects along the chain, one line each.
    pub fn subjects(&self) -> Vec<String> {
        self.certs().map(|c| c.subject_string()).collect()
    }

    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.certs().map(|c| c.fingerprint).collect()
    }
}

/// Result of looking up the next issuer.
enum IssuerLookup {
    Found(usize),
    /// Matches exist but all are already in the chain.
    OnlyVisited,
    NotFound,
}

/// Precomputed issuer index over one pool.
///
/// Build once per run and reuse for every walk.
#[derive(Debug)]
pub struct ChainBuilder<'a> {
    pool: &'a CertificatePool,
    roles: Vec<Role>,
    /// Non-leaf pool indices by subject, in pool order.
    candidates: HashMap<&'a DistinguishedName, Vec<usize>>,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(pool: &'a CertificatePool) -> Self {
        let roles = pool.roles();
        let mut candidates: HashMap<&'a DistinguishedName, Vec<usize>> = HashMap::new();
        for (idx, (entry, role)) in pool.entries().iter().zip(&roles).enumerate() {
            if *role != Role::Leaf {
                candidates.entry(&entry.cert.subject).or_default().push(idx);
            }
        }
        ChainBuilder {
            pool,
            roles,
            candidates,
        }
    }

    /// Roles of every pool entry, index-aligned with the pool.
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn role_counts(&self) -> RoleCounts {
        count_roles(&self.roles)
    }

    /// Walk from pool entry `start` towards a root.
    ///
    /// Returns `None` only when `start` is out of range.
    ///
    /// When several candidates share the wanted subject, the first one in
    /// pool order wins. A stale or renewed duplicate can therefore be picked
    /// over a newer certificate with the same name.
    pub fn build(&self, start: usize) -> Option<Chain<'a>> {
        let first = self.pool.get(start)?;
        let mut links = vec![first];
        let mut visited = vec![start];
        let mut current = first;

        let mut end = ChainEnd::DepthExceeded;
        for _ in 0..MAX_CHAIN_HOPS {
            match self.find_issuer(&current.cert, &visited, &links) {
                IssuerLookup::Found(idx) => {
                    let Some(issuer) = self.pool.get(idx) else {
                        end = ChainEnd::MissingIssuer;
                        break;
                    };
                    links.push(issuer);
                    visited.push(idx);
                    current = issuer;
                    if issuer.cert.is_self_signed() {
                        end = ChainEnd::ReachedRoot;
                        break;
                    }
                }
                IssuerLookup::OnlyVisited | IssuerLookup::NotFound
                    if current.cert.is_self_signed() =>
                {
                    // Only reachable for a self-signed starting certificate.
                    end = ChainEnd::ReachedRoot;
                    break;
                }
                IssuerLookup::OnlyVisited => {
                    end = ChainEnd::Cycle;
                    break;
                }
                IssuerLookup::NotFound => {
                    end = ChainEnd::MissingIssuer;
                    break;
                }
            }
        }

        log::debug!(
            "chain for {}: {} link(s), {}",
            first.name,
            links.len(),
            end
        );
        Some(Chain { links, end })
    }

    /// Build the chain of every pool entry, in pool order.
    ///
    /// Walks run in parallel; the result order matches the pool.
    pub fn build_all(&self) -> Vec<Chain<'a>> {
        (0..self.pool.len())
            .into_par_iter()
            .filter_map(|idx| self.build(idx))
            .collect()
    }

    fn find_issuer(
        &self,
        current: &Certificate,
        visited: &[usize],
        links: &[&PoolEntry],
    ) -> IssuerLookup {
        let Some(matches) = self.candidates.get(&current.issuer) else {
            return IssuerLookup::NotFound;
        };

        let mut saw_visited = false;
        for &idx in matches {
            let Some(entry) = self.pool.get(idx) else {
                continue;
            };
            let already_linked = visited.contains(&idx)
                || links
                    .iter()
                    .any(|l| l.cert.fingerprint == entry.cert.fingerprint);
            if already_linked {
                saw_visited = true;
                continue;
            }
            return IssuerLookup::Found(idx);
        }

        if saw_visited {
            IssuerLookup::OnlyVisited
        } else {
            IssuerLookup::NotFound
        }
    }
}

/// Build the chain for one pool entry.
///
/// Convenience wrapper around [`ChainBuilder`]; prefer the builder when
/// walking more than one certificate of the same pool.
pub fn build_chain(pool: &CertificatePool, start: usize) -> Option<Chain<'_>> {
    ChainBuilder::new(pool).build(start)
}

/// Build the chain of every pool entry, in pool order.
pub fn build_all_chains(pool: &CertificatePool) -> Vec<Chain<'_>> {
    ChainBuilder::new(pool).build_all()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::testutil::{cert, root};
    use std::collections::HashSet;

    fn pool(certs: Vec<Certificate>) -> CertificatePool {
        let mut pool = CertificatePool::new();
        for (i, c) in certs.into_iter().enumerate() {
            pool.push(format!("c{}.pem", i), c);
        }
        pool
    }

    fn names(chain: &Chain<'_>) -> Vec<String> {
        chain.links().iter().map(|e| e.name.clone()).collect()
    }

    fn assert_no_repeats(chain: &Chain<'_>) {
        let fps = chain.fingerprints();
        let unique: HashSet<_> = fps.iter().collect();
        assert_eq!(unique.len(), fps.len(), "repeated fingerprint in {:?}", names(chain));
    }

    #[test]
    fn lone_root_has_length_one() {
        let p = pool(vec![root("Root A", 1)]);
        let chain = build_chain(&p, 0).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.end(), ChainEnd::ReachedRoot);
    }

    #[test]
    fn leaf_walks_through_intermediate_to_root() {
        let p = pool(vec![
            root("Root A", 1),
            cert("Intermediate B", "Root A", 2),
            cert("Leaf C", "Intermediate B", 3),
        ]);
        let chain = build_chain(&p, 2).unwrap();
        assert_eq!(names(&chain), ["c2.pem", "c1.pem", "c0.pem"]);
        assert_eq!(chain.end(), ChainEnd::ReachedRoot);
        assert_eq!(chain.leaf().subject.common_name(), Some("Leaf C"));
        assert_eq!(chain.root().subject.common_name(), Some("Root A"));
    }

    #[test]
    fn missing_issuer_stops_at_one() {
        let p = pool(vec![cert("Leaf D", "Unknown CA", 1)]);
        let chain = build_chain(&p, 0).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.end(), ChainEnd::MissingIssuer);
    }

    #[test]
    fn partial_chain_ends_at_missing_issuer() {
        let p = pool(vec![
            cert("Intermediate", "Absent Root", 1),
            cert("Leaf", "Intermediate", 2),
        ]);
        let chain = build_chain(&p, 1).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.end(), ChainEnd::MissingIssuer);
    }

    #[test]
    fn out_of_range_start() {
        let p = pool(vec![root("Root", 1)]);
        assert!(build_chain(&p, 1).is_none());
    }

    #[test]
    fn two_certificate_cycle_terminates_without_repeats() {
        // A issued by B, B issued by A; neither is self-signed.
        let p = pool(vec![cert("A", "B", 1), cert("B", "A", 2)]);
        for start in 0..p.len() {
            let chain = build_chain(&p, start).unwrap();
            assert_eq!(chain.len(), 2);
            assert_eq!(chain.end(), ChainEnd::Cycle);
            assert_no_repeats(&chain);
        }
    }

    #[test]
    fn duplicate_file_does_not_extend_a_cycle() {
        // Same certificate twice (same fingerprint) in a two-node cycle.
        let p = pool(vec![cert("A", "B", 1), cert("B", "A", 2), cert("B", "A", 2)]);
        let chain = build_chain(&p, 0).unwrap();
        assert_eq!(chain.len(), 2);
        assert_no_repeats(&chain);
    }

    #[test]
    fn long_chain_hits_hop_limit() {
        // L0 <- L1 <- ... <- L14, no root anywhere.
        let certs = (0..15u8)
            .map(|i| cert(&format!("L{}", i), &format!("L{}", i + 1), i + 1))
            .collect();
        let p = pool(certs);
        let chain = build_chain(&p, 0).unwrap();
        assert_eq!(chain.len(), MAX_CHAIN_HOPS + 1);
        assert_eq!(chain.end(), ChainEnd::DepthExceeded);
        assert_no_repeats(&chain);
    }

    #[test]
    fn root_exactly_ten_hops_away_is_reached() {
        let mut certs: Vec<Certificate> = (0..10u8)
            .map(|i| cert(&format!("L{}", i), &format!("L{}", i + 1), i + 1))
            .collect();
        certs.push(root("L10", 100));
        let p = pool(certs);
        let chain = build_chain(&p, 0).unwrap();
        assert_eq!(chain.len(), 11);
        assert_eq!(chain.end(), ChainEnd::ReachedRoot);
    }

    #[test]
    fn duplicate_subject_picks_first_in_pool_order() {
        // Two intermediates share a subject (e.g. a renewal). The walk
        // takes whichever comes first in the pool, even if it is the
        // stale one.
        let p = pool(vec![
            root("Root", 1),
            cert("Inter", "Root", 2), // stale
            cert("Inter", "Root", 3), // renewed
            cert("Leaf", "Inter", 4),
        ]);
        let chain = build_chain(&p, 3).unwrap();
        assert_eq!(names(&chain), ["c3.pem", "c1.pem", "c0.pem"]);

        let reordered = pool(vec![
            root("Root", 1),
            cert("Inter", "Root", 3),
            cert("Inter", "Root", 2),
            cert("Leaf", "Inter", 4),
        ]);
        let chain = build_chain(&reordered, 3).unwrap();
        assert_eq!(chain.links()[1].cert.fingerprint, Fingerprint::from_bytes([3; 32]));
    }

    #[test]
    fn self_signed_start_follows_same_named_root() {
        // Two distinct roots with the same name: the walk from the first
        // links to the second, which is itself a root.
        let p = pool(vec![root("Root", 1), root("Root", 2)]);
        let chain = build_chain(&p, 0).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.end(), ChainEnd::ReachedRoot);

        // An exact duplicate is excluded by fingerprint.
        let dup = pool(vec![root("Root", 1), root("Root", 1)]);
        assert_eq!(build_chain(&dup, 0).unwrap().len(), 1);
    }

    #[test]
    fn build_all_matches_pool_order() {
        let p = pool(vec![
            cert("Leaf", "Inter", 3),
            root("Root", 1),
            cert("Inter", "Root", 2),
        ]);
        let builder = ChainBuilder::new(&p);
        let chains = builder.build_all();
        assert_eq!(chains.len(), 3);
        let starts: Vec<_> = chains.iter().map(|c| c.links()[0].name.clone()).collect();
        assert_eq!(starts, ["c0.pem", "c1.pem", "c2.pem"]);
        assert_eq!(chains[0].len(), 3);
    }

    #[test]
    fn termination_and_no_repeat_over_dense_pools() {
        // Every name issues every other name: a complete graph of issuers
        // plus some roots. All walks must terminate without repeats.
        let names: Vec<String> = (0..6).map(|i| format!("N{}", i)).collect();
        let mut certs = Vec::new();
        let mut id = 1u8;
        for subject in &names {
            for issuer in &names {
                certs.push(cert(subject, issuer, id));
                id += 1;
            }
        }
        let p = pool(certs);
        let builder = ChainBuilder::new(&p);
        for chain in builder.build_all() {
            assert!(chain.len() <= MAX_CHAIN_HOPS + 1);
            assert_no_repeats(&chain);
        }
    }
}
