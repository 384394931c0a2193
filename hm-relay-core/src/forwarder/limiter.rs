//! Outbound rate limiting of cloud-bound app commands.
//!
//! The device protocol spells commands as `cd=<code>` inside a text
//! payload. A small set of codes is polled aggressively by clients and
//! throttled upstream; those are limited per device and code.

use once_cell::sync::Lazy;
use regex::Regex;

/// Command codes subject to rate limiting.
pub const RATE_LIMITED_CODES: [u32; 8] = [1, 13, 15, 16, 21, 26, 28, 30];

static CODE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"cd=0*(\d+)").expect("static pattern"));

/// Extract the rate-limited command code from a payload, if any.
///
/// Non-text payloads, payloads without a `cd=` field, unparseable numbers
/// and codes outside the limited set all yield `None` - the limiter fails
/// open.
pub fn rate_limited_code(payload: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(payload).ok()?;
    let caps = CODE_PATTERN.captures(text)?;
    let code: u32 = caps[1].parse().ok()?;
    RATE_LIMITED_CODES.contains(&code).then_some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_padded_codes() {
        assert_eq!(rate_limited_code(b"cd=01"), Some(1));
        assert_eq!(rate_limited_code(b"cd=0001,md=1"), Some(1));
        assert_eq!(rate_limited_code(b"cd=13"), Some(13));
        assert_eq!(rate_limited_code(b"cd=030"), Some(30));
    }

    #[test]
    fn unlimited_codes_pass() {
        assert_eq!(rate_limited_code(b"cd=2"), None);
        assert_eq!(rate_limited_code(b"cd=17"), None);
    }

    #[test]
    fn fails_open_on_garbage() {
        assert_eq!(rate_limited_code(b"no code here"), None);
        assert_eq!(rate_limited_code(&[0xff, 0xfe, 0x00]), None);
        assert_eq!(rate_limited_code(b"cd=99999999999999999999"), None);
        assert_eq!(rate_limited_code(b""), None);
    }
}
