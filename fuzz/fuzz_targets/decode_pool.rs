#![no_main]

use certaudit_lib::{
    analyze, decode_cert, display_text, to_json, CertificatePool, ClassifyOptions, LoadReport,
    TextOptions, TrustAnchorTable,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding must never panic, regardless of input.
    let Ok(certs) = decode_cert(data) else {
        return;
    };

    // Whatever decodes becomes a pool; the first certificate doubles as the
    // only trust anchor so every classification branch stays reachable.
    let mut anchors = TrustAnchorTable::new();
    if let Some(first) = certs.first() {
        anchors.insert(first.clone());
    }
    let mut pool = CertificatePool::new();
    for (i, cert) in certs.into_iter().enumerate() {
        pool.push(format!("input[{}]", i), cert);
    }

    let report = analyze(&pool, &anchors, &ClassifyOptions::default());
    for cert in &report.certificates {
        assert!(cert.outcome.chain_length <= certaudit_lib::MAX_CHAIN_HOPS + 1);
    }
    let load = LoadReport::default();
    let _ = display_text(&report, &load, &TextOptions::default());
    let _ = to_json(&report, &load);
});
