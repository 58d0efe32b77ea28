//! Human-readable and JSON formatting of audit reports.

use crate::audit::{AuditReport, CertReport, Summary};
use crate::classify::TrustState;
use crate::pool::LoadReport;
use crate::util;
use crate::AuditError;
use serde::Serialize;

/// Subjects longer than this are shortened in chain listings.
const CHAIN_SUBJECT_WIDTH: usize = 80;

const HEAVY_RULE: usize = 70;
const LIGHT_RULE: usize = 100;

/// Options for [`display_text`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TextOptions {
    /// Flag valid certificates expiring within this window.
    pub expiry_warning: Option<time::Duration>,
}

/// Format an audit report as human-readable text.
pub fn display_text(report: &AuditReport, load: &LoadReport, options: &TextOptions) -> String {
    let mut out = String::new();
    let s = &report.summary;

    out.push_str(&"=".repeat(HEAVY_RULE));
    out.push_str("\nCertificate Chain Audit\n");
    out.push_str(&"=".repeat(HEAVY_RULE));
    out.push('\n');
    out.push_str(&format!(
        "Evaluated at:    {}\n",
        util::format_iso8601(report.evaluated_at)
    ));
    out.push_str(&format!("Trust anchors:   {}\n", report.anchor_count));
    out.push_str(&format!("Files processed: {}\n", load.files_processed));
    out.push_str(&format!("Files decoded:   {}\n", load.files_decoded));
    out.push_str(&format!("Certificates:    {}\n", s.total));
    if report.whole_chain_validity {
        out.push_str("Validity:        every link checked\n");
    }
    out.push_str(&"=".repeat(HEAVY_RULE));
    out.push_str("\n\n");

    format_summary(&mut out, s);

    if !load.skipped.is_empty() {
        out.push_str("Skipped files:\n");
        for skipped in &load.skipped {
            out.push_str(&format!("  {}: {}\n", skipped.name, skipped.reason));
        }
        out.push('\n');
    }

    out.push_str("Certificates:\n");
    out.push_str(&"=".repeat(LIGHT_RULE));
    out.push('\n');
    if report.certificates.is_empty() {
        out.push_str("No certificates to display\n");
    }
    for (i, cert) in report.certificates.iter().enumerate() {
        format_cert(&mut out, i + 1, cert, options);
        out.push_str(&"-".repeat(LIGHT_RULE));
        out.push('\n');
    }

    if s.total > 0 && !s.all_trusted() {
        format_hints(&mut out, report);
    }

    out
}

fn format_summary(out: &mut String, s: &Summary) {
    out.push_str("Summary:\n");
    if s.total == 0 {
        out.push_str("  No certificates decoded\n\n");
        return;
    }
    out.push_str(&format!(
        "  Roots: {}  Intermediates: {}  Leaves: {}\n",
        s.roles.roots, s.roles.intermediates, s.roles.leaves
    ));
    out.push_str(&format!(
        "  Valid:    {}/{} ({:.1}%)\n",
        s.valid, s.total, s.valid_percent
    ));
    out.push_str(&format!(
        "  Trusted:  {}/{} ({:.1}%)\n",
        s.trusted, s.total, s.trusted_percent
    ));
    out.push_str(&format!(
        "  Complete: {}/{} ({:.1}%)\n\n",
        s.complete, s.total, s.complete_percent
    ));

    out.push_str("By trust state:\n");
    for sc in &s.by_state {
        out.push_str(&format!(
            "  {:<34} {:>5} ({:.1}%)\n",
            sc.state.label(),
            sc.count,
            sc.percent
        ));
    }
    out.push('\n');
}

fn format_cert(out: &mut String, index: usize, cert: &CertReport, options: &TextOptions) {
    let o = &cert.outcome;

    out.push_str(&format!("{}. {}\n", index, cert.name));
    out.push_str(&format!("   Subject: {}\n", cert.subject));
    out.push_str(&format!("   Issuer: {}\n", cert.issuer));
    out.push_str(&format!("   Serial: {}\n", cert.serial));
    out.push_str(&format!(
        "   Validity: {} to {}\n",
        util::format_date(cert.not_before),
        util::format_date(cert.not_after)
    ));

    if o.is_valid {
        out.push_str(&format!("   Status: valid ({} days remaining)", o.days_remaining));
        if let Some(window) = options.expiry_warning {
            if o.days_remaining <= window.whole_days() {
                out.push_str(" [expires soon]");
            }
        }
        out.push('\n');
    } else {
        out.push_str("   Status: INVALID (expired or not yet valid)\n");
    }

    let mark = if o.is_trusted() { "trusted" } else { "untrusted" };
    out.push_str(&format!("   Trust: [{}] {}: {}\n", mark, o.trust, o.reason));

    if cert.chain.len() > 1 {
        out.push_str(&format!(
            "   Chain ({} certificates, {}):\n",
            o.chain_length, o.chain_end
        ));
        for (depth, link) in cert.chain.iter().enumerate() {
            out.push_str(&format!(
                "     {}{} {}\n",
                "  ".repeat(depth),
                link.name,
                util::shorten(&link.subject, CHAIN_SUBJECT_WIDTH)
            ));
        }
    }

    out.push_str(&format!("   Role: {}\n", cert.role));
    out.push_str(&format!("   Signature Algorithm: {}\n", cert.signature_algorithm));
    out.push_str(&format!("   Public Key: {}\n", cert.public_key));
    out.push_str(&format!("   Fingerprint (SHA-256): {}\n", cert.fingerprint));
}

fn count_where(report: &AuditReport, pred: impl Fn(&CertReport) -> bool) -> usize {
    report.certificates.iter().filter(|c| pred(c)).count()
}

fn format_hints(out: &mut String, report: &AuditReport) {
    let incomplete = count_where(report, |c| {
        matches!(
            c.outcome.trust,
            TrustState::NoIssuerFound | TrustState::IncompleteChain
        )
    });
    let untrusted_roots = count_where(report, |c| {
        matches!(
            c.outcome.trust,
            TrustState::UntrustedSelfSignedRoot | TrustState::CompleteUntrustedRoot
        )
    });
    let invalid = count_where(report, |c| !c.outcome.is_valid);
    let mut missing_anchors: Vec<&str> = report
        .certificates
        .iter()
        .filter_map(|c| c.outcome.issuer_anchor.as_deref())
        .collect();
    missing_anchors.sort_unstable();
    missing_anchors.dedup();

    out.push_str("\nRecommendations:\n");
    if report.anchor_count == 0 {
        out.push_str(
            "  - No trust anchors were loaded. Pass --CAfile or --CApath, or check the system store.\n",
        );
    }
    if incomplete > 0 {
        out.push_str(&format!(
            "  - {} certificate(s) have incomplete chains. Add the missing intermediate or root certificates to the folder.\n",
            incomplete
        ));
    }
    for anchor in &missing_anchors {
        out.push_str(&format!(
            "  - Trust anchor {} issues certificates in the folder but is not in it. Copy it in to complete those chains.\n",
            anchor
        ));
    }
    if untrusted_roots > 0 {
        out.push_str(&format!(
            "  - {} certificate(s) end at a root that is not a trust anchor. Install that root into the trust store if it is expected.\n",
            untrusted_roots
        ));
    }
    if invalid > 0 {
        out.push_str(&format!(
            "  - {} certificate(s) are outside their validity window. Renew or remove them.\n",
            invalid
        ));
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    files: &'a LoadReport,
    #[serde(flatten)]
    report: &'a AuditReport,
}

/// Serialize an audit report to a pretty-printed JSON string.
pub fn to_json(report: &AuditReport, load: &LoadReport) -> Result<String, AuditError> {
    serde_json::to_string_pretty(&JsonReport {
        files: load,
        report,
    })
    .map_err(AuditError::Json)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::anchors::TrustAnchorTable;
    use crate::audit::analyze;
    use crate::classify::ClassifyOptions;
    use crate::pool::{CertificatePool, SkippedFile};
    use crate::testutil::{cert, cert_with_validity, now, root};
    use time::macros::datetime;

    fn options() -> ClassifyOptions {
        ClassifyOptions {
            at_time: Some(now()),
            ..ClassifyOptions::default()
        }
    }

    fn sample() -> (AuditReport, LoadReport) {
        let root_a = root("Root A", 1);
        let mut anchors = TrustAnchorTable::new();
        anchors.insert(root_a.clone());

        let long_name = "X".repeat(120);
        let mut pool = CertificatePool::new();
        pool.push("root.pem", root_a);
        pool.push("inter.pem", cert(&long_name, "Root A", 2));
        pool.push("leaf.pem", cert("Leaf", &long_name, 3));
        pool.push("orphan.pem", cert("Orphan", "Nobody", 4));

        let load = LoadReport {
            files_processed: 5,
            files_decoded: 4,
            skipped: vec![SkippedFile {
                name: "junk.crt".into(),
                reason: "not a certificate".into(),
            }],
        };
        (analyze(&pool, &anchors, &options()), load)
    }

    #[test]
    fn text_report_sections() {
        let (report, load) = sample();
        let text = display_text(&report, &load, &TextOptions::default());
        assert!(text.contains("Trust anchors:   1"));
        assert!(text.contains("Files processed: 5"));
        assert!(text.contains("junk.crt: not a certificate"));
        assert!(text.contains("Trusted:  3/4 (75.0%)"));
        assert!(text.contains("3. leaf.pem"));
        assert!(text.contains("Recommendations:"));
        assert!(text.contains("incomplete chains"));
    }

    #[test]
    fn chain_subjects_are_shortened() {
        let (report, load) = sample();
        let text = display_text(&report, &load, &TextOptions::default());
        let full = format!("CN={}", "X".repeat(120));
        assert!(!text
            .lines()
            .filter(|l| l.contains("inter.pem "))
            .any(|l| l.contains(&full)));
        assert!(text.contains("..."));
    }

    #[test]
    fn fully_trusted_report_has_no_hints() {
        let root_a = root("Root A", 1);
        let mut anchors = TrustAnchorTable::new();
        anchors.insert(root_a.clone());
        let mut pool = CertificatePool::new();
        pool.push("root.pem", root_a);
        let report = analyze(&pool, &anchors, &options());
        let text = display_text(&report, &LoadReport::default(), &TextOptions::default());
        assert!(!text.contains("Recommendations:"));
    }

    #[test]
    fn expiry_warning_flags_soon_expiring() {
        let soon = cert_with_validity(
            "Soon",
            "Soon",
            1,
            datetime!(2020-01-01 0:00 UTC),
            datetime!(2026-06-10 0:00 UTC),
        );
        let mut pool = CertificatePool::new();
        pool.push("soon.pem", soon);
        let report = analyze(&pool, &TrustAnchorTable::new(), &options());

        let warn = TextOptions {
            expiry_warning: Some(time::Duration::days(30)),
        };
        let text = display_text(&report, &LoadReport::default(), &warn);
        assert!(text.contains("[expires soon]"));

        let text = display_text(&report, &LoadReport::default(), &TextOptions::default());
        assert!(!text.contains("[expires soon]"));
    }

    #[test]
    fn hints_name_anchor_missing_from_folder() {
        let root_a = root("Root A", 1);
        let mut anchors = TrustAnchorTable::new();
        anchors.insert(root_a.clone());
        let mut pool = CertificatePool::new();
        pool.push("inter.pem", cert("Inter", "Root A", 2));
        pool.push("leaf.pem", cert("Leaf", "Inter", 3));
        pool.push("other.pem", cert("Other", "Root A", 4));
        let report = analyze(&pool, &anchors, &options());

        let text = display_text(&report, &LoadReport::default(), &TextOptions::default());
        let line = format!("Trust anchor {} issues certificates", root_a.subject_string());
        assert_eq!(text.matches(&line).count(), 1);

        let json = to_json(&report, &LoadReport::default()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value["certificates"][1]["outcome"]["issuer_anchor"],
            root_a.subject_string()
        );
    }

    #[test]
    fn json_report_fields() {
        let (report, load) = sample();
        let json = to_json(&report, &load).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["files"]["files_processed"], 5);
        assert_eq!(value["anchor_count"], 1);
        assert_eq!(value["evaluated_at"], "2026-06-01T12:00:00Z");
        assert_eq!(value["certificates"][0]["outcome"]["trust"], "trusted_self_signed_root");
        assert_eq!(value["certificates"][2]["outcome"]["chain_length"], 3);
        assert_eq!(value["summary"]["by_state"].as_array().unwrap().len(), 6);
    }
}
