//! Text clean-up applied to scraped post metadata.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Random, url-safe, 12 character post id.
pub fn new_short_id() -> String {
    let uuid = Uuid::new_v4();
    URL_SAFE_NO_PAD.encode(&uuid.as_bytes()[..9])
}

/// Decode HTML character references against the full HTML5 entity table.
///
/// Unknown references are kept verbatim.
pub fn decode_html_entities(input: &str) -> String {
    html_escape::decode_html_entities(input).into_owned()
}

/// Read time in whole minutes, from a number or a numeric string.
///
/// Zero, negative and unparsable values mean "unknown".
pub fn parse_read_time(raw: Option<&JsonValue>) -> Option<i32> {
    let minutes = match raw? {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => leading_integer(s)? as f64,
        _ => return None,
    };
    let minutes = minutes.floor();
    (minutes >= 1.0 && minutes <= i32::MAX as f64).then_some(minutes as i32)
}

fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

/// `None` for blank handles (`""` or a bare `"@"`).
pub fn clean_twitter(raw: Option<String>) -> Option<String> {
    raw.filter(|t| !t.is_empty() && t != "@")
}

/// Lookup key for a twitter handle: without `@`, lowercased.
pub fn twitter_key(handle: &str) -> String {
    handle.strip_prefix('@').unwrap_or(handle).to_lowercase()
}
