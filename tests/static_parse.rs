//! Static parse and codec tests against real receiver frames.

use qgcproto::error::ConversionError;
use qgcproto::{
    calc_checksum, get_bits, is_valid_checksum, parse, schema, Codec, FieldKey, MessageError, MsgMode, ParseError,
    ParseOptions, QgcError, QgcMessage, Value,
};
use std::collections::HashMap;

const PPPB2B_DATA: [u8; 61] = [
    0x10, 0x35, 0xfc, 0x49, 0x04, 0x40, 0x01, 0x3f, 0x77, 0x04, 0x00, 0x11, 0x00, 0x04, 0x40, 0x01, 0x10, 0x00, 0x44,
    0x00, 0x11, 0x00, 0x05, 0x80, 0x00, 0x5f, 0x6b, 0x84, 0x00, 0x11, 0x00, 0x07, 0x7d, 0x63, 0x10, 0x00, 0x78, 0x17,
    0x0f, 0xfd, 0xd1, 0x02, 0x57, 0x10, 0x00, 0x44, 0x00, 0x11, 0x00, 0x04, 0x40, 0x01, 0x10, 0x00, 0x58, 0x7f, 0x00,
    0x01, 0x81, 0x36, 0xb0,
];

fn pppb2b_frame() -> Vec<u8> {
    let mut f = vec![0x51, 0x47, 0x0a, 0xb2, 0x55, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x3c, 0x20, 0x01];
    f.extend_from_slice(&[0u8; 16]);
    f.extend_from_slice(&PPPB2B_DATA);
    f.extend_from_slice(&[0x4c, 0xf4]);
    f
}

const SEN_IMU: [u8; 45] = [
    0x51, 0x47, 0x10, 0x01, 0x25, 0x00, 0x03, 0x82, 0x3c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x66, 0x66, 0xdc, 0x41,
    0x33, 0x63, 0xb2, 0xbd, 0x00, 0xdc, 0x26, 0xbe, 0xff, 0xff, 0xb7, 0x39, 0xc7, 0xcf, 0xe3, 0x3b, 0xa4, 0xe0, 0x90,
    0x3a, 0x7f, 0xda, 0x7e, 0xbf, 0x2b, 0xf2,
];

fn get() -> ParseOptions {
    ParseOptions::default()
}

fn with_mode(mode: MsgMode) -> ParseOptions {
    ParseOptions { mode, ..ParseOptions::default() }
}

#[test]
fn test_parse_pppb2b() {
    let frame = pppb2b_frame();
    assert_eq!(frame.len(), 93);
    let msg = parse(&frame, &get()).expect("parse");
    assert_eq!(msg.identity(), "RAW-PPPB2B");
    assert_eq!(msg.msg_grp(), 0x0a);
    assert_eq!(msg.msg_id(), 0xb2);
    assert_eq!(msg.length(), 85);
    assert_eq!(msg.mode(), MsgMode::Get);
    assert_eq!(msg.get("msgver"), Some(&Value::UInt(1)));
    assert_eq!(msg.get("prn"), Some(&Value::UInt(60)));
    assert_eq!(msg.get("pppstatus"), Some(&Value::UInt(1)));
    assert_eq!(msg.get("msgtype"), Some(&Value::UInt(1)));
    assert_eq!(msg.get("msgdata").and_then(Value::as_bytes), Some(&PPPB2B_DATA[..]));
    assert_eq!(msg.get("reserved4"), None);
    assert_eq!(msg.serialize(), frame);
}

#[test]
fn test_display_pppb2b() {
    let msg = parse(&pppb2b_frame(), &get()).expect("parse");
    let shown = msg.to_string();
    assert!(
        shown.starts_with(
            "<QGC(RAW-PPPB2B, msgver=1, reserved1=0, prn=60, pppstatus=1, msgtype=1, reserved2=0, msgdata=b'\\x10\\x35\\xfc"
        ),
        "{}",
        shown
    );
    assert!(shown.ends_with("\\x81\\x36\\xb0')>"), "{}", shown);
}

#[test]
fn test_pppb2b_without_bitfields() {
    let opts = ParseOptions { parse_bitfields: false, ..ParseOptions::default() };
    let msg = parse(&pppb2b_frame(), &opts).expect("parse");
    assert_eq!(msg.get("flag"), Some(&Value::Bytes(vec![0x20])));
    assert_eq!(msg.get("pppstatus"), None);
    assert_eq!(msg.serialize(), pppb2b_frame());
}

#[test]
fn test_construct_pppb2b() {
    let msg = QgcMessage::builder(0x0a, 0xb2, MsgMode::Get)
        .field("msgver", 1u8)
        .field("prn", 60u8)
        .field("pppstatus", 1u8)
        .field("msgtype", 1u8)
        .field("msgdata", &PPPB2B_DATA[..])
        .build()
        .expect("build");
    assert_eq!(msg.serialize(), pppb2b_frame());
    let reparsed = parse(&msg.serialize(), &get()).expect("reparse");
    assert_eq!(reparsed.to_string(), msg.to_string());
}

#[test]
fn test_bad_header() {
    let mut frame = pppb2b_frame();
    frame[1] = 0x58;
    let err = parse(&frame, &get()).unwrap_err();
    assert!(matches!(
        err,
        QgcError::Parse(ParseError::InvalidHeader { found: [0x51, 0x58], expected: [0x51, 0x47] })
    ));
    assert_eq!(err.to_string(), "invalid message header b'\\x51\\x58' - should be b'\\x51\\x47'");
}

#[test]
fn test_bad_length() {
    let mut frame = pppb2b_frame();
    frame[4] = 0x56;
    let err = parse(&frame, &get()).unwrap_err();
    assert_eq!(err.to_string(), "invalid payload length b'\\x56\\x00' - should be b'\\x55\\x00'");
}

#[test]
fn test_bad_checksum() {
    let mut frame = pppb2b_frame();
    let last = frame.len() - 1;
    frame[last] = 0xf5;
    let err = parse(&frame, &get()).unwrap_err();
    assert!(matches!(
        err,
        QgcError::Parse(ParseError::InvalidChecksum { found: [0x4c, 0xf5], expected: [0x4c, 0xf4] })
    ));
    assert!(err.to_string().starts_with("message checksum b'\\x4c\\xf5' invalid"));
}

#[test]
fn test_bad_checksum_permitted() {
    let mut frame = pppb2b_frame();
    let last = frame.len() - 1;
    frame[last] = 0xf5;
    let opts = ParseOptions { validate: false, ..ParseOptions::default() };
    let msg = parse(&frame, &opts).expect("parse without validation");
    assert_eq!(msg.get("prn"), Some(&Value::UInt(60)));
    assert_eq!(msg.checksum(), [0x4c, 0xf5]);
}

#[test]
fn test_sen_imu() {
    let msg = parse(&SEN_IMU, &get()).expect("parse");
    assert_eq!(
        msg.to_string(),
        "<QGC(SEN-IMU, msgver=3, timestamp=15490, imutemp=27.549999237060547, gyox=-0.08710326999425888, \
         gyoy=-0.1629486083984375, gyoz=0.00035095211933366954, accx=0.006952259223908186, \
         accy=0.0011053276248276234, accz=-0.9955214858055115)>"
    );
    let imutemp = msg.get("imutemp").and_then(Value::as_f64).expect("imutemp");
    assert!((imutemp - 27.55).abs() < 1e-5);
}

#[test]
fn test_wrong_mode_is_unknown_message() {
    let err = parse(&SEN_IMU, &with_mode(MsgMode::Set)).unwrap_err();
    assert!(matches!(
        err,
        QgcError::Message(MessageError::UnknownMessage { msg_grp: 0x10, msg_id: 0x01, mode: MsgMode::Set })
    ));
}

#[test]
fn test_unknown_identity_is_nominal() {
    let frame = [0x51, 0x47, 0x01, 0x77, 0x04, 0x00, 0x03, 0x02, 0x00, 0x00, 0x81, 0x73];
    for mode in [MsgMode::Get, MsgMode::Set, MsgMode::Poll] {
        let msg = parse(&frame, &with_mode(mode)).expect("nominal parse");
        assert!(msg.is_nominal());
        assert_eq!(msg.identity(), "UNKNOWN-0177-NOMINAL");
        assert_eq!(msg.to_string(), "<QGC(UNKNOWN-0177-NOMINAL, payload=b'\\x03\\x02\\x00\\x00')>");
        assert_eq!(msg.get("data_01"), Some(&Value::Bytes(vec![0x03])));
        assert_eq!(msg.get("data_04"), Some(&Value::Bytes(vec![0x00])));
        assert_eq!(msg.serialize(), frame);
    }
}

#[test]
fn test_ack() {
    let frame = [0x51, 0x47, 0x01, 0x01, 0x04, 0x00, 0x02, 0x10, 0x00, 0x00, 0x18, 0x5f];
    let msg = parse(&frame, &get()).expect("parse");
    assert_eq!(msg.to_string(), "<QGC(ACK-ACK, ackmsggrp=2, ackmsgid=16, errcode=0, reserved1=0)>");
}

#[test]
fn test_cfg_msg_variants() {
    let intf = [0x51, 0x47, 0x02, 0x10, 0x07, 0x00, 0x04, 0x00, 0xca, 0x02, 0x90, 0x01, 0x03, 0x7d, 0xc0];
    let msg = parse(&intf, &get()).expect("GET intf");
    assert_eq!(msg.identity(), "CFG-MSG");
    assert_eq!(
        msg.to_string(),
        "<QGC(CFG-MSG, intftype=4, intfid=0, setmsggrp=202, setmsgid=2, rate=400, msgver=3)>"
    );

    let poll = [0x51, 0x47, 0x02, 0x10, 0x03, 0x00, 0x10, 0x01, 0x03, 0x29, 0xb2];
    let msg = parse(&poll, &with_mode(MsgMode::Poll)).expect("POLL");
    assert_eq!(msg.to_string(), "<QGC(CFG-MSG, setmsggrp=16, setmsgid=1, msgver=3)>");

    let poll_intf = [0x51, 0x47, 0x02, 0x10, 0x05, 0x00, 0x04, 0x00, 0x10, 0x01, 0x03, 0x2f, 0xfe];
    let msg = parse(&poll_intf, &with_mode(MsgMode::Poll)).expect("POLL intf");
    assert_eq!(msg.to_string(), "<QGC(CFG-MSG, intftype=4, intfid=0, setmsggrp=16, setmsgid=1, msgver=3)>");
}

#[test]
fn test_uart_disable_variant() {
    let frame = [0x51, 0x47, 0x02, 0x01, 0x02, 0x00, 0x01, 0x00, 0x06, 0x1b];
    let msg = parse(&frame, &with_mode(MsgMode::Set)).expect("parse");
    assert_eq!(msg.to_string(), "<QGC(CFG-UART, intfid=1, intfstatus=0)>");

    let built = QgcMessage::builder_for("CFG-UART", MsgMode::Set)
        .expect("identity")
        .field("intfid", 1u8)
        .length(2)
        .build()
        .expect("build");
    assert_eq!(built.serialize(), frame);
}

#[test]
fn test_setpoll_inference() {
    let set = [
        0x51, 0x47, 0x02, 0x04, 0x0c, 0x00, 0x03, 0x00, 0x00, 0x01, 0xa0, 0x86, 0x01, 0x00, 0x40, 0x0d, 0x03, 0x00,
        0x8d, 0x0e,
    ];
    let msg = parse(&set, &with_mode(MsgMode::SetPoll)).expect("setpoll as set");
    assert_eq!(msg.mode(), MsgMode::Set);
    assert_eq!(msg.get("baudrate"), Some(&Value::UInt(100_000)));
    assert_eq!(msg.get("databaudrate"), Some(&Value::UInt(200_000)));

    let poll = [0x51, 0x47, 0x02, 0x04, 0x01, 0x00, 0x03, 0x0a, 0x20];
    let msg = parse(&poll, &with_mode(MsgMode::SetPoll)).expect("setpoll as poll");
    assert_eq!(msg.mode(), MsgMode::Poll);
    assert_eq!(msg.to_string(), "<QGC(CFG-CAN, intfid=3)>");
}

#[test]
fn test_inf_ver() {
    let msg = QgcMessage::builder_for("INF-VER", MsgMode::Get)
        .expect("identity")
        .field("verstr", "LUA600A00AANR01A02")
        .field("builddate", "2023/04/17")
        .field("buildtime", "16:28:06")
        .build()
        .expect("build");
    assert_eq!(msg.length(), 36);
    assert_eq!(msg.checksum(), [0x06, 0x25]);
    let parsed = parse(&msg.serialize(), &get()).expect("parse");
    assert_eq!(
        parsed.to_string(),
        "<QGC(INF-VER, verstr=LUA600A00AANR01A02, builddate=2023/04/17, buildtime=16:28:06)>"
    );

    let poll = [0x51, 0x47, 0x06, 0x01, 0x00, 0x00, 0x07, 0x1b];
    let msg = parse(&poll, &with_mode(MsgMode::Poll)).expect("poll");
    assert_eq!(msg.payload(), None);
    assert_eq!(msg.to_string(), "<QGC(INF-VER)>");
}

#[test]
fn test_inf_sn() {
    let frame = [
        0x51, 0x47, 0x06, 0x02, 0x10, 0x00, 0x01, 0x51, 0x32, 0x39, 0x47, 0x30, 0x46, 0x32, 0x32, 0x32, 0x32, 0x30,
        0x30, 0x36, 0x36, 0x36, 0x5c, 0x1e,
    ];
    let msg = parse(&frame, &get()).expect("parse");
    assert_eq!(msg.get("snstr").and_then(Value::as_str), Some("Q29G0F222200666"));

    // no POLL layout: falls back to the SET table
    let poll = [0x51, 0x47, 0x06, 0x02, 0x01, 0x00, 0x01, 0x0a, 0x2a];
    let msg = parse(&poll, &with_mode(MsgMode::Poll)).expect("poll");
    assert_eq!(msg.to_string(), "<QGC(INF-SN, snid=1)>");
}

#[test]
fn test_hase6_variable_width() {
    let msgdata: Vec<u8> = (0u8..53).collect();
    let msg = QgcMessage::builder_for("RAW-HASE6", MsgMode::Get)
        .expect("identity")
        .field("page", 1u8)
        .field("hasmode", 1u8)
        .field("msgdata", msgdata.clone())
        .build()
        .expect("build");
    assert_eq!(msg.length(), 0x4d);
    assert_eq!(msg.checksum(), [0xa1, 0x3e]);
    let parsed = parse(&msg.serialize(), &get()).expect("parse");
    assert_eq!(parsed.get("msgdata").and_then(Value::as_bytes), Some(&msgdata[..]));
    assert_eq!(parsed.get("hasmode"), Some(&Value::UInt(1)));
}

fn reencode(codec: &Codec<'_>, msg: &QgcMessage) -> QgcMessage {
    let values: HashMap<String, Value> = msg.fields().iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    codec.encode(msg.msg_grp(), msg.msg_id(), msg.mode(), &values).expect("encode")
}

#[test]
fn test_qzssl6_wide_reserved_field() {
    let codec = Codec::builtin();
    let mut payload = vec![0u8; 274];
    payload[0] = 1;
    payload[5] = 199;
    payload[6] = 0x81;
    payload.iter_mut().skip(24).enumerate().for_each(|(i, b)| *b = i as u8);

    let msg = codec.decode_payload(0x0a, 0xb6, MsgMode::Get, &payload).expect("all-zero reserved2");
    assert_eq!(msg.get("reserved2"), Some(&Value::UInt(0)));
    assert_eq!(msg.get("rsstatus"), Some(&Value::UInt(1)));
    assert_eq!(msg.get("msgtype"), Some(&Value::UInt(1)));
    assert_eq!(reencode(&codec, &msg).payload(), Some(&payload[..]));

    // 17th byte of reserved2 set: kept as raw bytes, written back unchanged
    payload[23] = 1;
    let msg = codec.decode_payload(0x0a, 0xb6, MsgMode::Get, &payload).expect("non-zero reserved2");
    assert_eq!(msg.get("reserved2").and_then(Value::as_bytes), Some(&payload[7..24]));
    assert_eq!(msg.get("prn"), Some(&Value::UInt(199)));
    let again = reencode(&codec, &msg);
    assert_eq!(again.payload(), Some(&payload[..]));
    assert_eq!(again.serialize(), msg.serialize());
    let parsed = parse(&msg.serialize(), &get()).expect("parse");
    assert_eq!(parsed.fields(), msg.fields());
}

#[test]
fn test_non_utf8_serial_number_kept() {
    let codec = Codec::builtin();
    let payload = [0x01, b'Q', b'2', 0xff, 0xfe, b'9'];
    let msg = codec.decode_payload(0x06, 0x02, MsgMode::Get, &payload).expect("decode");
    assert_eq!(msg.get("snstr"), Some(&Value::Bytes(payload[1..].to_vec())));
    assert_eq!(msg.to_string(), "<QGC(INF-SN, snid=1, snstr=b'\\x51\\x32\\xff\\xfe\\x39')>");
    assert_eq!(reencode(&codec, &msg).payload(), Some(&payload[..]));
}

#[test]
fn test_control_messages() {
    let rst = QgcMessage::builder_for("CTL-RST", MsgMode::Set)
        .expect("identity")
        .field("rstmask", 0xffu16)
        .field("rstmode", 1u8)
        .build()
        .expect("build");
    assert_eq!(rst.serialize(), [0x51, 0x47, 0x03, 0x01, 0x04, 0x00, 0xff, 0x00, 0x01, 0x00, 0x08, 0x35]);

    let uart = QgcMessage::builder_for("CFG-UART", MsgMode::Set)
        .expect("identity")
        .fields([("intfid", Value::from(1u8)), ("baudrate", Value::from(115_200u32)), ("databit", Value::from(8u8))])
        .field("stopbit", 1u8)
        .build()
        .expect("build");
    assert_eq!(
        uart.serialize(),
        [
            0x51, 0x47, 0x02, 0x01, 0x0c, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0xc2, 0x01, 0x00, 0x08, 0x00, 0x01, 0x00,
            0xdc, 0x59
        ]
    );

    let imu = QgcMessage::builder_for("CFG-IMULPF", MsgMode::Get)
        .expect("identity")
        .field("gyofilter", 10u16)
        .field("accfilter", 20u16)
        .build()
        .expect("build");
    assert_eq!(imu.serialize(), [0x51, 0x47, 0x02, 0x20, 0x04, 0x00, 0x0a, 0x00, 0x14, 0x00, 0x44, 0x58]);
}

#[test]
fn test_type_errors() {
    let err = QgcMessage::builder(0x0a, 0xb2, MsgMode::Get)
        .field("prn", "60")
        .build()
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "incorrect type (expected integer, got string) for attribute 'prn' in GET message RAW-PPPB2B"
    );

    let err = QgcMessage::builder(0x0a, 0xb2, MsgMode::Get)
        .field("prn", 99_999_999u32)
        .build()
        .unwrap_err();
    match err {
        QgcError::Type(e) => {
            assert_eq!(e.field, "prn");
            assert_eq!(e.identity, "RAW-PPPB2B");
            assert!(matches!(e.cause, ConversionError::Overflow { width: 1, .. }));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_truncated_payload() {
    // CFG-CAN SET declares 12 bytes; only 4 supplied and validation off
    let frame = [0x51, 0x47, 0x02, 0x04, 0x04, 0x00, 0x03, 0x00, 0x00, 0x01, 0x00, 0x00];
    let opts = ParseOptions { validate: false, mode: MsgMode::Set, parse_bitfields: true };
    let err = parse(&frame, &opts).unwrap_err();
    match err {
        QgcError::Type(e) => {
            assert_eq!(e.field, "baudrate");
            assert_eq!(e.cause, ConversionError::Truncated { needed: 4, available: 0 });
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_codec_decode_payload_and_encode() {
    let codec = Codec::builtin();
    let msg = codec
        .decode_payload(0x03, 0x02, MsgMode::Set, &[0x01, 0x00])
        .expect("decode");
    assert_eq!(msg.serialize(), [0x51, 0x47, 0x03, 0x02, 0x02, 0x00, 0x01, 0x00, 0x08, 0x26]);

    let values: HashMap<String, Value> = msg.fields().iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    let again = codec.encode(0x03, 0x02, MsgMode::Set, &values).expect("encode");
    assert_eq!(again, msg);
}

#[test]
fn test_helpers() {
    assert_eq!(calc_checksum(&[0x06, 0x01, 0x02, 0x00, 0xf0, 0x05]), [0xfe, 0x16]);
    assert!(is_valid_checksum(b"\xb5b\x06\x01\x02\x00\xf0\x05\xfe\x16"));
    assert!(!is_valid_checksum(b"\xb5b\x06\x01\x02\x00\xf0\x05\xfe\x15"));

    let cases: [(&[u8], u128, u128); 6] = [
        (b"\x89", 192, 2),
        (b"\xc9", 3, 1),
        (b"\x89", 9, 9),
        (b"\xc9", 9, 9),
        (b"\x18\x18", 8, 1),
        (b"\x18\x20", 8, 0),
    ];
    for (bytes, mask, expected) in cases {
        assert_eq!(get_bits(bytes, mask), expected, "{:?} & {:#x}", bytes, mask);
    }

    assert_eq!(schema::msg_ids("CFG-UART"), Some((0x02, 0x01)));
    assert_eq!(schema::msg_ids("CFG-XXXX"), None);
    assert_eq!(schema::identity(0x0a, 0xb6), "RAW-QZSSL6");
    assert_eq!(schema::identity(0x99, 0x99), "UNKNOWN-9999-NOMINAL");
    assert_eq!(schema::payload_len("CFG-MSG-INTF", MsgMode::Set), Some(7));
    assert_eq!(schema::payload_len("INF-VER", MsgMode::Get), None);

    assert_eq!(schema::input_mode(0x02, 0x04, 1), MsgMode::Poll);
    assert_eq!(schema::input_mode(0x02, 0x04, 12), MsgMode::Set);
    assert_eq!(schema::input_mode(0x02, 0x01, 1), MsgMode::Poll);
    assert_eq!(schema::input_mode(0x02, 0x01, 12), MsgMode::Set);
    assert_eq!(schema::input_mode(0x99, 0x99, 12), MsgMode::Set);

    assert_eq!(FieldKey::parse("gnod_03_06").indices, vec![3, 6]);
    assert_eq!(FieldKey::parse("cno_101").index(), 101);
    assert_eq!(FieldKey::parse("gmsLon").index(), 0);
    assert_eq!(FieldKey::parse("dodgy_xx").name, "dodgy_xx");
}

#[test]
fn test_invalid_mode_code() {
    let err = ParseOptions::default().with_mode_code(4).unwrap_err();
    assert_eq!(err, ParseError::InvalidMode(4));
    assert_eq!(MsgMode::try_from(3), Ok(MsgMode::SetPoll));
}
