//! Tests for pool range parsing.

use tether::range::{parse_id_range, parse_ipv4_range};
use tether::{Error, Range, RangeKind};

// ============================================================================
// ID ranges
// ============================================================================

#[test]
fn id_hyphen_range() {
    let range = Range::ids("1-5").unwrap();
    assert_eq!(range.kind(), RangeKind::Id);
    assert_eq!(range.members(), &["1", "2", "3", "4", "5"]);
}

#[test]
fn id_comma_values() {
    let range = Range::ids("1,3,5,7").unwrap();
    assert_eq!(range.members(), &["1", "3", "5", "7"]);
}

#[test]
fn id_single_value() {
    let range = Range::ids("42").unwrap();
    assert_eq!(range.members(), &["42"]);
    assert_eq!(range.len(), 1);
}

#[test]
fn id_whitespace_trimmed() {
    let range = Range::ids(" 1 , 3 , 5 ").unwrap();
    assert_eq!(range.members(), &["1", "3", "5"]);
}

#[test]
fn id_empty_input() {
    assert!(matches!(Range::ids(""), Err(Error::InvalidRange)));
}

#[test]
fn id_invalid_values() {
    assert!(matches!(Range::ids("1-a"), Err(Error::InvalidRange)));
    assert!(matches!(Range::ids("a,b,c"), Err(Error::InvalidRange)));
}

#[test]
fn id_reversed_range() {
    assert!(matches!(Range::ids("5-1"), Err(Error::InvalidRange)));
}

#[test]
fn id_mixed_format_rejected() {
    // Hyphen handling wins, leaving "1,3" and "5,7" as the endpoints.
    assert!(matches!(Range::ids("1,3-5,7"), Err(Error::InvalidRange)));
}

#[test]
fn id_triple_hyphen_rejected() {
    assert!(matches!(parse_id_range("1-2-3"), Err(Error::InvalidRange)));
}

#[test]
fn id_only_commas_is_empty() {
    assert!(matches!(parse_id_range(",,"), Err(Error::EmptyRange)));
}

#[test]
fn id_numeric_members() {
    assert_eq!(parse_id_range("1-5").unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(parse_id_range("1,3,5").unwrap(), vec![1, 3, 5]);
}

// ============================================================================
// IPv4 ranges
// ============================================================================

#[test]
fn ipv4_hyphen_range() {
    let range = Range::ipv4("192.168.1.1-192.168.1.5").unwrap();
    assert_eq!(range.kind(), RangeKind::Ipv4);
    assert_eq!(
        range.members(),
        &[
            "192.168.1.1",
            "192.168.1.2",
            "192.168.1.3",
            "192.168.1.4",
            "192.168.1.5"
        ]
    );
}

#[test]
fn ipv4_single_address() {
    let range = Range::ipv4("192.168.1.3").unwrap();
    assert_eq!(range.members(), &["192.168.1.3"]);
}

#[test]
fn ipv4_comma_addresses() {
    let range = Range::ipv4("192.168.1.1,192.168.1.100").unwrap();
    assert_eq!(range.members(), &["192.168.1.1", "192.168.1.100"]);
}

#[test]
fn ipv4_span_crosses_octet_boundary() {
    let range = Range::ipv4("192.168.1.254-192.168.2.1").unwrap();
    assert_eq!(
        range.members(),
        &["192.168.1.254", "192.168.1.255", "192.168.2.0", "192.168.2.1"]
    );
}

#[test]
fn ipv6_comma_form_accepted() {
    let range = Range::ipv4("2001:db8::1,2001:db8::10").unwrap();
    assert_eq!(range.members(), &["2001:db8::1", "2001:db8::10"]);
}

#[test]
fn ipv6_hyphen_form_rejected() {
    assert!(matches!(
        Range::ipv4("2001:db8::1-2001:db8::10"),
        Err(Error::Ipv6RangeUnsupported)
    ));
}

#[test]
fn ipv4_rejects_bare_integers() {
    assert!(matches!(Range::ipv4("5-1"), Err(Error::InvalidRange)));
    assert!(matches!(Range::ipv4("5"), Err(Error::InvalidRange)));
}

#[test]
fn ipv4_octet_out_of_bounds() {
    assert!(matches!(
        Range::ipv4("192.168.1.256"),
        Err(Error::InvalidRange)
    ));
}

#[test]
fn ipv4_leading_zero_octet_rejected() {
    assert!(matches!(
        Range::ipv4("192.168.1.01"),
        Err(Error::InvalidRange)
    ));
}

#[test]
fn ipv4_reversed_range() {
    assert!(matches!(
        Range::ipv4("192.168.1.10-192.168.1.1"),
        Err(Error::InvalidRange)
    ));
}

#[test]
fn ipv4_empty_input() {
    assert!(matches!(Range::ipv4(""), Err(Error::InvalidRange)));
    assert!(matches!(parse_ipv4_range(",,"), Err(Error::EmptyRange)));
}

#[test]
fn ipv4_whitespace_trimmed() {
    let range = Range::ipv4(" 10.0.0.1 , 10.0.0.2 ").unwrap();
    assert_eq!(range.members(), &["10.0.0.1", "10.0.0.2"]);
}
