//! Request decoding against client-shaped bytes.

use rstest::rstest;

use super::RawMessage;
use crate::{
    CodecError, Disposition, NameLayout, PortDescriptor, PortName, Request, RequestBody,
    ServiceName, decode_request, encode_request,
};

fn service(name: &str, layout: NameLayout) -> ServiceName {
    ServiceName::new(name, layout).expect("test names are valid")
}

#[test]
fn decodes_mig_check_in() {
    let bytes = RawMessage::received(160, 402).ndr().name_t("svcA").build();
    let request = decode_request(&bytes).expect("check-in should decode");
    assert_eq!(
        request.body,
        RequestBody::CheckIn {
            name: service("svcA", NameLayout::Fixed)
        }
    );
    assert_eq!(
        request.reply_port(),
        Some((PortName::new(0x1207), Disposition::MoveSendOnce))
    );
}

#[test]
fn decodes_length_prefixed_look_up() {
    let bytes = RawMessage::received(164, 404)
        .ndr()
        .prefixed_name("com.apple.CARenderServer")
        .build();
    let request = decode_request(&bytes).expect("look-up should decode");
    assert_eq!(
        request.body,
        RequestBody::LookUp {
            name: service("com.apple.CARenderServer", NameLayout::LengthPrefixed)
        }
    );
}

#[rstest]
#[case(403, 176, NameLayout::Fixed)]
#[case(403, 180, NameLayout::LengthPrefixed)]
#[case(700, 180, NameLayout::LengthPrefixed)]
fn decodes_register_layouts(#[case] id: i32, #[case] size: u32, #[case] layout: NameLayout) {
    let raw = RawMessage::received_complex(size, id)
        .u32(1)
        .port_descriptor(0x2303, Disposition::MoveSend.raw())
        .ndr();
    let bytes = match layout {
        NameLayout::Fixed => raw.name_t("svcR"),
        NameLayout::LengthPrefixed => raw.prefixed_name("svcR"),
    }
    .build();
    let request = decode_request(&bytes).expect("register should decode");
    let name = request.body.name().expect("register carries a name");
    assert_eq!(name.as_str(), "svcR");
    assert_eq!(name.layout(), layout);
    assert_eq!(
        request.body.port(),
        Some(&PortDescriptor::new(
            PortName::new(0x2303),
            Disposition::MoveSend
        ))
    );
}

#[test]
fn truncated_look_up_is_rejected() {
    let mut bytes = RawMessage::received(164, 404)
        .ndr()
        .prefixed_name("svcA")
        .build();
    bytes.truncate(100);
    let error = decode_request(&bytes).expect_err("100 bytes cannot hold a look-up");
    assert_eq!(
        error,
        CodecError::Truncated {
            id: 404,
            expected: 164,
            actual: 100
        }
    );
}

#[test]
fn short_declared_size_is_rejected() {
    let bytes = RawMessage::received(100, 404).raw(&[0; 76]).build();
    let error = decode_request(&bytes).expect_err("declared size is below minimum");
    assert_eq!(
        error,
        CodecError::Truncated {
            id: 404,
            expected: 160,
            actual: 100
        }
    );
}

#[test]
fn buffer_shorter_than_header_is_rejected() {
    let error = decode_request(&[0; 12]).expect_err("header is incomplete");
    assert!(matches!(error, CodecError::Truncated { id: 0, .. }));
}

#[test]
fn trailer_bytes_after_the_message_are_ignored() {
    let mut bytes = RawMessage::received(160, 404).ndr().name_t("svcA").build();
    bytes.extend_from_slice(&[0xAA; 68]);
    let request = decode_request(&bytes).expect("trailer must be ignored");
    assert_eq!(request.header.declared_len(), 160);
}

#[test]
fn foreign_ndr_record_is_rejected() {
    let bytes = RawMessage::received(160, 404)
        .raw(&[1, 0, 0, 0, 9, 0, 0, 0])
        .name_t("svcA")
        .build();
    let error = decode_request(&bytes).expect_err("NDR mismatch must fail");
    assert_eq!(
        error,
        CodecError::UnknownEncoding {
            id: 404,
            record: [1, 0, 0, 0, 9, 0, 0, 0]
        }
    );
}

#[test]
fn oversized_name_length_is_rejected() {
    let bytes = RawMessage::received(164, 701)
        .ndr()
        .u32(129)
        .raw(&[b'a'; 128])
        .build();
    let error = decode_request(&bytes).expect_err("length beyond capacity must fail");
    assert_eq!(error, CodecError::NameTooLong { id: 701, length: 129 });
}

#[test]
fn register_without_complex_bit_is_rejected() {
    let bytes = RawMessage::received(180, 403)
        .u32(1)
        .port_descriptor(0x2303, Disposition::MoveSend.raw())
        .ndr()
        .prefixed_name("svcR")
        .build();
    let error = decode_request(&bytes).expect_err("register must be complex");
    assert!(matches!(
        error,
        CodecError::MalformedDescriptor { id: 403, .. }
    ));
}

#[test]
fn register_with_two_descriptors_is_rejected() {
    let bytes = RawMessage::received_complex(180, 700)
        .u32(2)
        .port_descriptor(0x2303, Disposition::MoveSend.raw())
        .ndr()
        .prefixed_name("svcR")
        .build();
    let error = decode_request(&bytes).expect_err("descriptor count must be one");
    assert!(matches!(
        error,
        CodecError::MalformedDescriptor { id: 700, .. }
    ));
}

#[rstest]
#[case(406, RequestBody::Parent)]
#[case(409, RequestBody::Subset)]
#[case(702, RequestBody::SpawnApp)]
#[case(799, RequestBody::Wake)]
#[case(405, RequestBody::Unknown { id: 405 })]
#[case(72, RequestBody::Unknown { id: 72 })]
fn header_only_requests_decode(#[case] id: i32, #[case] expected: RequestBody) {
    let bytes = RawMessage::received(24, id).build();
    let request = decode_request(&bytes).expect("header-only request should decode");
    assert_eq!(request.body, expected);
}

#[rstest]
#[case(RequestBody::CheckIn { name: service("svcA", NameLayout::Fixed) }, 160)]
#[case(RequestBody::LookUp { name: service("svcA", NameLayout::LengthPrefixed) }, 164)]
#[case(RequestBody::LookupPort { name: service("svcA", NameLayout::LengthPrefixed) }, 164)]
#[case(
    RequestBody::Register {
        name: service("svcR", NameLayout::Fixed),
        port: PortDescriptor::new(PortName::new(0x2303), Disposition::CopySend),
    },
    176
)]
#[case(
    RequestBody::RegisterPort {
        name: service("svcR", NameLayout::LengthPrefixed),
        port: PortDescriptor::new(PortName::new(0x2303), Disposition::CopySend),
    },
    180
)]
#[case(RequestBody::Parent, 24)]
fn requests_survive_a_round_trip(#[case] body: RequestBody, #[case] size: usize) {
    let request = Request::new(body, PortName::new(0x1103), PortName::new(0x1207));
    let bytes = encode_request(&request);
    assert_eq!(bytes.len(), size);
    assert_eq!(request.header.declared_len(), size);
    assert_eq!(decode_request(&bytes).expect("encoded request decodes"), request);
}
