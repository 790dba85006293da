//! Error sentinel wire format and boundary decoding.

use std::io;

use jpki_wrapper::translate::{
    decode, encode, from_boundary_error, into_boundary_error, BoundaryOutcome,
    SCARD_E_NOT_READY, SCARD_E_UNKNOWN_CARD, SCARD_W_CANCELLED_BY_USER, SCARD_W_CHV_BLOCKED,
};
use jpki_wrapper::TranslatedError;
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_sentinel_round_trip(code in any::<i32>(), sub_code in any::<i32>()) {
        prop_assert_eq!(decode(&encode(code, sub_code)), Some((code, sub_code)));
    }

    #[test]
    fn prop_boundary_round_trip(code in any::<i32>(), sub_code in any::<i32>()) {
        let original = TranslatedError::new(code, sub_code, "native text");
        match from_boundary_error(into_boundary_error(original.clone())) {
            BoundaryOutcome::Provider(decoded) => prop_assert_eq!(decoded, original),
            other => prop_assert!(false, "unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn prop_non_sentinel_messages_pass_through(message in "[^!].*") {
        let err = io::Error::new(io::ErrorKind::Other, message.clone());
        match from_boundary_error(err) {
            BoundaryOutcome::Passthrough(e) => prop_assert_eq!(e.to_string(), message),
            other => prop_assert!(false, "unexpected outcome: {:?}", other),
        }
    }
}

#[test]
fn test_known_sentinel() {
    assert_eq!(encode(5, -2147483638), "!ErrorCode=5,WinErrorCode=-2147483638");
    assert_eq!(decode("!ErrorCode=5,WinErrorCode=-2147483638"), Some((5, -2147483638)));
}

#[test]
fn test_table() {
    let cases = [
        (SCARD_E_NOT_READY, "コマンドを受け取る準備ができていません"),
        (SCARD_E_UNKNOWN_CARD, "認識できないスマート カードです"),
        (SCARD_W_CHV_BLOCKED, "カードはロックされています"),
        (SCARD_W_CANCELLED_BY_USER, "ユーザーによって操作は取り消されました"),
    ];
    for (sub_code, japanese) in cases {
        let err = TranslatedError::new(1, sub_code, "native");
        assert!(err.is_well_known());
        assert!(err.localized_message().contains(japanese), "{}", err.localized_message());
        assert_ne!(err.message(), "native");
    }
}

#[test]
fn test_sentinel_from_plain_io_error() {
    // A sentinel that was rebuilt from text alone (no boundary payload)
    let err = io::Error::new(io::ErrorKind::Other, "!ErrorCode=3,WinErrorCode=-2146435056");
    match from_boundary_error(err) {
        BoundaryOutcome::Provider(e) => {
            assert_eq!(e.code(), 3);
            assert_eq!(e.sub_code(), SCARD_E_NOT_READY);
            assert!(e.is_well_known());
        },
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_malformed_sentinels() {
    for message in [
        "!ErrorCode=abc,WinErrorCode=1",
        "!ErrorCode=1",
        "!ErrorCode=99999999999,WinErrorCode=0",
        "!ErrorCode=1,WinErrorCode=2 trailing",
        "!",
    ] {
        let err = io::Error::new(io::ErrorKind::Other, message);
        match from_boundary_error(err) {
            BoundaryOutcome::Malformed(m) => assert_eq!(m, message),
            other => panic!("{message}: unexpected outcome {other:?}"),
        }
    }
}
