//! Shared formatting utilities.

use crate::oid;
use time::OffsetDateTime;

/// Format bytes as colon-separated uppercase hex (e.g., "AB:CD:EF").
pub fn hex_colon_upper(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Whether the input looks like PEM text (starts with `-----BEGIN` after
/// leading whitespace).
pub fn is_pem(input: &[u8]) -> bool {
    let start = input
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(input.len());
    input
        .get(start..)
        .is_some_and(|rest| rest.starts_with(b"-----BEGIN"))
}

/// Map a DN attribute OID to its conventional short name.
pub fn oid_short_name(oid_str: &str) -> String {
    match oid_str {
        oid::COMMON_NAME => "CN".into(),
        oid::SURNAME => "SN".into(),
        oid::SERIAL_NUMBER => "serialNumber".into(),
        oid::COUNTRY => "C".into(),
        oid::LOCALITY => "L".into(),
        oid::STATE_OR_PROVINCE => "ST".into(),
        oid::STREET_ADDRESS => "street".into(),
        oid::ORGANIZATION => "O".into(),
        oid::ORGANIZATIONAL_UNIT => "OU".into(),
        oid::TITLE => "title".into(),
        oid::POSTAL_CODE => "postalCode".into(),
        oid::GIVEN_NAME => "GN".into(),
        oid::EMAIL_ADDRESS => "emailAddress".into(),
        oid::DOMAIN_COMPONENT => "DC".into(),
        other => other.to_string(),
    }
}

/// Format in OpenSSL's default date style: `Feb  3 23:57:06 2026 GMT`.
pub fn format_openssl_date(dt: OffsetDateTime) -> String {
    let month = match u8::from(dt.month()) {
        1 => "Jan",
        2 => "Feb",
        3 => "Mar",
        4 => "Apr",
        5 => "May",
        6 => "Jun",
        7 => "Jul",
        8 => "Aug",
        9 => "Sep",
        10 => "Oct",
        11 => "Nov",
        12 => "Dec",
        _ => "???",
    };
    format!(
        "{} {:2} {:02}:{:02}:{:02} {} GMT",
        month,
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.year()
    )
}

/// `YYYY-MM-DDTHH:MM:SSZ` in UTC.
pub fn format_iso8601(dt: OffsetDateTime) -> String {
    let dt = dt.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

/// `YYYY-MM-DD` in UTC.
pub fn format_date(dt: OffsetDateTime) -> String {
    let dt = dt.to_offset(time::UtcOffset::UTC);
    format!("{:04}-{:02}-{:02}", dt.year(), u8::from(dt.month()), dt.day())
}

/// Truncate to `max` characters, appending "..." when shortened.
pub fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn detects_pem_after_whitespace() {
        assert!(is_pem(b"\n  -----BEGIN CERTIFICATE-----"));
        assert!(!is_pem(&[0x30, 0x82, 0x01]));
        assert!(!is_pem(b""));
    }

    #[test]
    fn openssl_date_pads_day() {
        assert_eq!(
            format_openssl_date(datetime!(2026-02-03 23:57:06 UTC)),
            "Feb  3 23:57:06 2026 GMT"
        );
    }

    #[test]
    fn shorten_counts_chars_not_bytes() {
        assert_eq!(shorten("abcdef", 3), "abc...");
        assert_eq!(shorten("Főtanúsítvány", 20), "Főtanúsítvány");
    }
}
