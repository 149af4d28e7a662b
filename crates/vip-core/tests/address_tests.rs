//! Logical address tests

use vip_core::{AddressRange, LogicalAddress, PrintForm};

fn sample_addresses() -> Vec<LogicalAddress> {
    let mut addrs = Vec::new();
    for main in ["0", "123", "00000456", "ZZ9", "A1B2C3D4", "99999999"] {
        for sub in [0u8, 1, 0x3F, 0x80, 0x9F, 0xFF] {
            addrs.push(LogicalAddress::parse(&format!("{}:{}", main, sub)).expect("valid address"));
        }
    }
    addrs
}

#[test]
fn test_display_parse_identity() {
    for addr in sample_addresses() {
        let printed = addr.to_string();
        assert_eq!(LogicalAddress::parse(&printed).unwrap(), addr, "{}", printed);
    }
}

#[test]
fn test_stripped_forms_parse_back() {
    for addr in sample_addresses() {
        let stripped = addr.to_stripped(true, false);
        assert_eq!(LogicalAddress::parse(&stripped).unwrap(), addr);

        let no_sub = addr.to_stripped(true, true);
        assert!(LogicalAddress::parse(&no_sub).unwrap().main_eq(&addr));
    }
}

#[test]
fn test_main_eq_ignores_sub() {
    let a = LogicalAddress::parse("00000456:1").unwrap();
    let b = LogicalAddress::parse("456:2").unwrap();
    assert!(a.main_eq(&b));
    assert_ne!(a, b);
    assert_eq!(a, b.with_sub(1));
}

#[test]
fn test_unassigned_sentinel() {
    assert!(LogicalAddress::UNASSIGNED.is_unassigned());
    assert!(LogicalAddress::parse("0").unwrap().is_unassigned());
    assert!(!LogicalAddress::parse("1").unwrap().is_unassigned());
    assert_eq!(LogicalAddress::default(), LogicalAddress::UNASSIGNED);
}

#[test]
fn test_from_u32() {
    let addr = LogicalAddress::from_u32(123, 1).unwrap();
    assert_eq!(addr.format(PrintForm::Full), "00000123:1");
    assert_eq!(addr.as_u32(), Some(123));
    assert!(LogicalAddress::from_u32(100_000_000, 0).is_err());
    assert!(LogicalAddress::from_u32(1, 0x50).is_err());
}

#[test]
fn test_broadcast_matching() {
    let identity = LogicalAddress::parse("123:4").unwrap();
    assert!(identity.matches(&LogicalAddress::parse("123:255").unwrap()));
    assert!(!identity.matches(&LogicalAddress::parse("124:255").unwrap()));
    assert!(!identity.matches(&LogicalAddress::parse("123:5").unwrap()));
}

#[test]
fn test_raw_validity() {
    let bad = LogicalAddress::from_raw(*b"0000abcd", 1);
    assert!(!bad.is_valid());
    let bad_sub = LogicalAddress::from_raw(*b"00000001", 0x50);
    assert!(!bad_sub.is_valid());
    assert!(LogicalAddress::from_raw(*b"00000001", 0x81).is_valid());
}

#[test]
fn test_serde_as_string() {
    let addr = LogicalAddress::parse("456:1").unwrap();
    let json = serde_json::to_string(&addr).unwrap();
    assert_eq!(json, "\"00000456:1\"");
    let back: LogicalAddress = serde_json::from_str(&json).unwrap();
    assert_eq!(back, addr);
    assert!(serde_json::from_str::<LogicalAddress>("\"bad!\"").is_err());
}

#[test]
fn test_range_overlap_symmetric_and_reflexive() {
    let ranges = [
        AddressRange::parse("100-199").unwrap(),
        AddressRange::parse("150-250").unwrap(),
        AddressRange::parse("200-300").unwrap(),
        AddressRange::parse("301-400").unwrap(),
        AddressRange::parse("500").unwrap(),
    ];
    for a in &ranges {
        assert!(a.overlaps(a));
        for b in &ranges {
            assert_eq!(a.overlaps(b), b.overlaps(a), "{} / {}", a, b);
        }
    }
    assert!(ranges[0].overlaps(&ranges[1]));
    assert!(ranges[1].overlaps(&ranges[2]));
    assert!(!ranges[0].overlaps(&ranges[2]));
    assert!(!ranges[2].overlaps(&ranges[3]));
}

#[test]
fn test_range_wire_form() {
    let range = AddressRange::parse("100-199").unwrap();
    let mut buf = Vec::new();
    range.write(&mut buf);
    assert_eq!(&buf[..], b"0000010000000199");
    assert_eq!(AddressRange::read(&mut &buf[..]), range);
}
