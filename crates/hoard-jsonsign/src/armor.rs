//! Text armor for signatures and public keys.
//!
//! The armor is a header line, a blank line, a base64 body wrapped at 64
//! columns, and a footer line. Consumers extract the body as everything
//! between the first blank line and the terminating delimiter.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::SignError;

pub const SIG_HEADER: &str = "-----BEGIN HOARD SIGNATURE-----";
pub const SIG_FOOTER: &str = "-----END HOARD SIGNATURE-----";
pub const PUBKEY_HEADER: &str = "-----BEGIN HOARD PUBLIC KEY-----";
pub const PUBKEY_FOOTER: &str = "-----END HOARD PUBLIC KEY-----";

/// Wrap `data` in armor.
pub fn armor(header: &str, footer: &str, data: &[u8]) -> String {
    let body = BASE64.encode(data);
    let mut out = String::with_capacity(header.len() + footer.len() + body.len() + 8);
    out.push_str(header);
    out.push_str("\n\n");
    for line in body.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(line).expect("base64 is ascii"));
        out.push('\n');
    }
    out.push_str(footer);
    out.push('\n');
    out
}

/// Extract the base64 body between the first blank line and the terminating
/// `-----` delimiter, strip newlines, and decode it.
pub fn unarmor(text: &str) -> Result<Vec<u8>, SignError> {
    let start = text
        .find("\n\n")
        .ok_or_else(|| SignError::BadArmor("no blank line after header".into()))?;
    let end = text[start..]
        .find("\n-----")
        .map(|i| start + i)
        .ok_or_else(|| SignError::BadArmor("no terminating delimiter".into()))?;
    let body: String = text[start + 2..end]
        .chars()
        .filter(|c| *c != '\n')
        .collect();
    BASE64
        .decode(body.as_bytes())
        .map_err(|e| SignError::BadArmor(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_armor_round_trip() {
        let data: Vec<u8> = (0..=255).collect();
        let armored = armor(SIG_HEADER, SIG_FOOTER, &data);
        assert!(armored.starts_with("-----BEGIN HOARD SIGNATURE-----\n\n"));
        assert!(armored.ends_with("-----END HOARD SIGNATURE-----\n"));
        assert_eq!(unarmor(&armored).unwrap(), data);
    }

    #[test]
    fn test_armor_wraps_long_bodies() {
        let data = vec![0xAB; 256];
        let armored = armor(PUBKEY_HEADER, PUBKEY_FOOTER, &data);
        for line in armored.lines() {
            assert!(line.len() <= 64 || line.starts_with("-----"));
        }
        assert_eq!(unarmor(&armored).unwrap(), data);
    }

    #[test]
    fn test_unarmor_rejects_missing_blank_line() {
        let bad = "-----BEGIN HOARD SIGNATURE-----\nQUJD\n-----END HOARD SIGNATURE-----\n";
        assert!(matches!(unarmor(bad), Err(SignError::BadArmor(_))));
    }

    #[test]
    fn test_unarmor_rejects_missing_footer() {
        let bad = "-----BEGIN HOARD SIGNATURE-----\n\nQUJD\n";
        assert!(matches!(unarmor(bad), Err(SignError::BadArmor(_))));
    }
}
