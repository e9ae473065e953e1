//! RFC 4648 base32 (upper case alphabet, no padding).

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Encode `input` as unpadded base32.
///
/// Every 5 input bytes produce 8 characters; a trailing partial group is
/// emitted without `=` padding.
pub fn base32_encode(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len().div_ceil(5) * 8);
    let mut buffer: u16 = 0;
    let mut bits: u32 = 0;

    for &byte in input {
        buffer = (buffer << 8) | u16::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = (buffer >> bits) & 0x1F;
            out.push(char::from(ALPHABET[index as usize]));
        }
        buffer &= (1 << bits) - 1;
    }

    if bits > 0 {
        let index = (buffer << (5 - bits)) & 0x1F;
        out.push(char::from(ALPHABET[index as usize]));
    }
    out
}

/// Whether `s` only contains base32 alphabet characters.
pub fn is_base32(s: &str) -> bool {
    s.bytes().all(|b| ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rfc4648_vectors() {
        assert_eq!(base32_encode(b""), "");
        assert_eq!(base32_encode(b"f"), "MY");
        assert_eq!(base32_encode(b"fo"), "MZXQ");
        assert_eq!(base32_encode(b"foo"), "MZXW6");
        assert_eq!(base32_encode(b"foob"), "MZXW6YQ");
        assert_eq!(base32_encode(b"fooba"), "MZXW6YTB");
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
    }

    #[test]
    fn twenty_bytes_is_thirty_two_chars() {
        assert_eq!(base32_encode(&[0xFF; 20]).len(), 32);
        assert_eq!(base32_encode(&[0x00; 20]), "A".repeat(32));
    }

    #[test]
    fn alphabet_check() {
        assert!(is_base32("TAHNZXQBC57AA7KJ"));
        assert!(!is_base32("tahn"));
        assert!(!is_base32("A1"));
    }

    proptest! {
        #[test]
        fn output_length_and_alphabet(input in proptest::collection::vec(any::<u8>(), 0..64)) {
            let encoded = base32_encode(&input);
            prop_assert_eq!(encoded.len(), (input.len() * 8).div_ceil(5));
            prop_assert!(is_base32(&encoded));
        }
    }
}
