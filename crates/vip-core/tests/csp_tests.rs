//! CSP codec tests

use vip_core::csp::{
    self, msg, AlertType, AlertingMessage, CallType, CapabReportMessage, Capabilities,
    CaptureAddMessage, ForwarderRole, MediaAction, MediaEndpoint, MediaHint, MediaKind,
    MediaMessage, ReleaseCause, ReleaseMessage, ResolutionBounds, SetOutput2Message,
    OutputState, StartExtension, StartLayout, StartMessage, UnitRole,
};
use vip_core::{AddressRange, Error, LogicalAddress, Message, MessageType};

fn addr(s: &str) -> LogicalAddress {
    LogicalAddress::parse(s).unwrap()
}

fn sample_messages() -> Vec<Message> {
    let start = StartMessage::new(addr("456:1"), addr("123"), CallType::Intercom, 42)
        .with_forwarder(addr("789"), ForwarderRole::FollowMe)
        .with_media(MediaHint(MediaHint::AUDIO))
        .with_extension(StartExtension::SpecificUser(3));

    let mut media = MediaMessage::new(
        MediaKind::Video,
        MediaAction::Start,
        MediaEndpoint::Udp("10.0.0.2:6000".parse().unwrap()),
    );
    media.hole_punch = true;
    media.rtp_mtu = Some(1200);
    media.bitrate_kbps = Some(1500);
    media.resolution = Some(ResolutionBounds {
        min_width: 320,
        min_height: 240,
        max_width: 1280,
        max_height: 720,
    });
    media.flow_id = Some(2);

    vec![
        Message::Start(start),
        Message::Proceeding,
        Message::Alerting(AlertingMessage {
            alert: AlertType::Queued,
        }),
        Message::Connect,
        Message::Release(ReleaseMessage::new(ReleaseCause::Diverted(addr("999:2")))),
        Message::CapabReport(CapabReportMessage {
            capabilities: Capabilities::default()
                .with(Capabilities::AUDIO_TX | Capabilities::AUDIO_RX | Capabilities::OPEN_DOOR),
            role: UnitRole::OutdoorStation,
            keylock_map: 0b101,
            max_streams: Some(2),
        }),
        Message::MediaOffer(media),
        Message::SetOutput2(SetOutput2Message {
            target: addr("321:1"),
            module: 1,
            index: 0,
            state: OutputState::Toggle,
            duration: Some(3),
        }),
        Message::CaptureAdd(CaptureAddMessage {
            range: AddressRange::parse("100-199").unwrap(),
            ttl: 600,
            handle: 9,
        }),
    ]
}

#[test]
fn test_start_mandatory_fields() {
    let start = StartMessage::new(addr("00000456:1"), addr("00000123"), CallType::Normal, 1);
    let encoded = csp::encode(&Message::Start(start)).unwrap();
    assert_eq!(encoded[0], csp::RESERVED);
    assert_eq!(encoded[1], msg::START);

    match csp::decode(&encoded).unwrap() {
        Message::Start(decoded) => {
            assert_eq!(decoded.from, addr("456:1"));
            assert_eq!(decoded.to, addr("123"));
            assert_eq!(decoded.call_type, CallType::Normal);
            assert_eq!(decoded.call_id, 1);
            assert_eq!(decoded.layout(), StartLayout::Base);
        }
        other => panic!("expected START, got {:?}", other),
    }
}

#[test]
fn test_samples_decode_to_themselves() {
    for message in sample_messages() {
        let encoded = csp::encode(&message).unwrap();
        assert_eq!(csp::decode(&encoded).unwrap(), message);
    }
}

#[test]
fn test_truncated_below_minimum_rejected() {
    for message in sample_messages() {
        let ty = message.message_type();
        let encoded = csp::encode(&message).unwrap();
        for cut in 0..ty.min_len() {
            let result = csp::decode(&encoded[..cut]);
            assert!(result.is_err(), "{} cut at {} parsed", ty.name(), cut);
            assert!(csp::parse(&encoded[..cut]).is_none());
        }
    }
}

#[test]
fn test_every_type_rejects_short_records() {
    for code in 0..=u8::MAX {
        let Some(ty) = MessageType::from_u8(code) else {
            continue;
        };
        if ty.min_len() <= csp::HEADER_LEN {
            continue;
        }
        let short = vec![0u8, code];
        assert!(matches!(
            csp::decode(&short),
            Err(Error::TooShort { msg_type, .. }) if msg_type == code
        ));
    }
}

#[test]
fn test_release_diverted_carries_target() {
    let target = addr("00000999:2");
    let encoded =
        csp::encode(&Message::Release(ReleaseMessage::new(ReleaseCause::Diverted(target)))).unwrap();
    assert_eq!(encoded.len(), 12);

    match csp::decode(&encoded).unwrap() {
        Message::Release(ReleaseMessage {
            cause: ReleaseCause::Diverted(decoded),
        }) => assert_eq!(decoded, target),
        other => panic!("expected diverted RELEASE, got {:?}", other),
    }

    // Diverted code without the target
    assert!(csp::decode(&encoded[..3]).is_err());
}

#[test]
fn test_optional_tail_gated_by_length() {
    let full = StartMessage::new(addr("456:1"), addr("123"), CallType::Normal, 5)
        .with_forwarder(addr("777"), ForwarderRole::Transfer)
        .with_media(MediaHint::audio_video());
    let encoded = csp::encode(&Message::Start(full)).unwrap();
    assert_eq!(encoded.len(), 41);

    // An older peer sending only the forwarded layout
    match csp::decode(&encoded[..40]).unwrap() {
        Message::Start(start) => {
            assert_eq!(start.layout(), StartLayout::Forwarded);
            assert!(start.media.is_empty());
            assert_eq!(start.forwarder.map(|f| f.address), Some(addr("777")));
        }
        other => panic!("expected START, got {:?}", other),
    }

    // Sizes between layouts fall back to the smaller one
    match csp::decode(&encoded[..35]).unwrap() {
        Message::Start(start) => assert_eq!(start.layout(), StartLayout::Base),
        other => panic!("expected START, got {:?}", other),
    }
}

#[test]
fn test_oversized_record_rejected() {
    let start = StartMessage::new(addr("456:1"), addr("123"), CallType::Test, 1)
        .with_extension(StartExtension::TechnicalMessage("x".repeat(2000)));
    assert!(matches!(
        csp::encode(&Message::Start(start)),
        Err(Error::PayloadTooLarge(_))
    ));
}

#[test]
fn test_unknown_and_reserved() {
    assert!(csp::parse(&[]).is_none());
    assert!(csp::parse(&[0x00, 0x99]).is_none());
    // The reserved byte is not checked on receive
    assert_eq!(csp::parse(&[0x7F, msg::CONNECT]), Some(Message::Connect));
}
