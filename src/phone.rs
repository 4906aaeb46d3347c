//! Phone key normalization.
//!
//! Every inbound identifier (`whatsapp:+974 5512-3456`, `97455123456@c.us`)
//! collapses to one comparable key. The key is used for the coordinator
//! check and for participant lookup, so all callers must go through
//! [`normalize`].

/// Transport prefixes stripped before digit extraction (matched case-insensitively).
const TRANSPORT_PREFIXES: &[&str] = &["whatsapp:", "tel:", "sms:"];

/// Canonicalize a raw sender/recipient identifier into a phone key.
///
/// Strips a known transport prefix, cuts any `@domain` suffix, then keeps
/// only ASCII digits (dropping `+`, spaces, dashes and brackets). Input with
/// no digits at all is returned as its lowercase alphanumeric characters.
/// Total and idempotent.
pub fn normalize(raw: &str) -> String {
    let mut rest = raw.trim();

    for prefix in TRANSPORT_PREFIXES {
        if rest.len() >= prefix.len()
            && rest.is_char_boundary(prefix.len())
            && rest[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            rest = &rest[prefix.len()..];
            break;
        }
    }

    let local = rest.split('@').next().unwrap_or_default();

    let digits: String = local.chars().filter(char::is_ascii_digit).collect();
    if !digits.is_empty() {
        return digits;
    }

    local
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Last four characters of a normalized key, used for default display names.
pub fn short_suffix(key: &str) -> &str {
    let count = key.chars().count();
    let skip = count.saturating_sub(4);
    match key.char_indices().nth(skip) {
        Some((idx, _)) => &key[idx..],
        None => key,
    }
}
