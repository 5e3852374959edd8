use super::{Decoded, FileEncoding, decode, detect, encode};
use proptest::prelude::*;

fn family() -> impl Strategy<Value = FileEncoding> {
    prop_oneof![
        Just(FileEncoding::Utf8),
        Just(FileEncoding::Utf8Bom),
        Just(FileEncoding::Utf16Le),
        Just(FileEncoding::Utf16Be),
    ]
}

// NUL-heavy plain UTF-8 reads as BOM-less UTF-16LE, and a leading U+FEFF
// is a BOM; neither occurs in governed text.
fn governed_text() -> impl Strategy<Value = String> {
    "[^\\x00\\x{FEFF}]{0,200}"
}

proptest! {
    #[test]
    fn prop_encode_then_detect_recovers_family(text in governed_text(), encoding in family()) {
        prop_assert_eq!(detect(&encode(&text, encoding)), encoding);
    }

    #[test]
    fn prop_decode_inverts_encode(text in governed_text(), encoding in family()) {
        let decoded = decode(&encode(&text, encoding)).ok();
        prop_assert_eq!(decoded, Some(Decoded { encoding, text }));
    }
}
