//! Per-kind normalization and validation of raw candidate values
//!
//! Extraction output is noisy: defanged indicators, mixed case, stray
//! whitespace. Everything that reaches the entity store goes through here
//! first, so the unique (kind, value) constraint operates on stable forms.

use thiserror::Error;

/// Why a raw candidate value was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("empty value")]
    Empty,

    #[error("malformed IP address: {0}")]
    MalformedIp(String),
}

/// Undo common defanging conventions: `1.2.3[.]4`, `hxxp://`, `evil[dot]com`.
pub fn refang(value: &str) -> String {
    let mut out = value
        .replace("[.]", ".")
        .replace("(.)", ".")
        .replace("[dot]", ".")
        .replace("[:]", ":")
        .replace("[@]", "@");
    for (defanged, clean) in [("hxxps://", "https://"), ("hxxp://", "http://")] {
        if out.to_lowercase().starts_with(defanged) {
            out = format!("{}{}", clean, &out[defanged.len()..]);
        }
    }
    out
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn looks_like_ipv4(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn looks_like_domain(s: &str) -> bool {
    s.contains('.')
        && !s.contains(char::is_whitespace)
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}

/// Normalize an indicator value.
///
/// Dotted quads are validated octet by octet (leading zeros stripped);
/// hex strings of MD5/SHA-1/SHA-256 length and domains/emails are
/// lowercased; URLs get a lowercased scheme and host. Anything else —
/// mutex names, registry keys, file paths — passes through trimmed, since
/// rejecting unrecognized shapes would drop real indicators.
pub fn normalize_indicator(raw: &str) -> Result<String, NormalizeError> {
    let value = refang(raw.trim());
    if value.is_empty() {
        return Err(NormalizeError::Empty);
    }

    if looks_like_ipv4(&value) {
        let mut octets = Vec::with_capacity(4);
        for part in value.split('.') {
            let octet: u8 = part
                .parse()
                .map_err(|_| NormalizeError::MalformedIp(value.clone()))?;
            octets.push(octet.to_string());
        }
        return Ok(octets.join("."));
    }

    if is_hex(&value) && matches!(value.len(), 32 | 40 | 64) {
        return Ok(value.to_lowercase());
    }

    if let Some(scheme_end) = value.find("://") {
        let scheme = value[..scheme_end].to_lowercase();
        let rest = &value[scheme_end + 3..];
        let (host, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        return Ok(format!("{}://{}{}", scheme, host.to_lowercase(), path));
    }

    if value.contains('@') && !value.contains(char::is_whitespace) {
        return Ok(value.to_lowercase());
    }

    if looks_like_domain(&value) {
        return Ok(value.to_lowercase());
    }

    Ok(value)
}

/// Normalize a technique reference.
///
/// ATT&CK ids (`t1566.001`) are uppercased; free-text technique names are
/// lowercased so "Spearphishing" and "spearphishing" share one row.
pub fn normalize_technique(raw: &str) -> Result<String, NormalizeError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(NormalizeError::Empty);
    }
    if is_attack_id(value) {
        Ok(value.to_uppercase())
    } else {
        Ok(value.to_lowercase())
    }
}

/// `T####` or `T####.###`, case-insensitive.
fn is_attack_id(s: &str) -> bool {
    let bytes = s.as_bytes();
    if !(bytes.len() == 5 || bytes.len() == 9) {
        return false;
    }
    if !bytes[0].eq_ignore_ascii_case(&b'T') {
        return false;
    }
    if !bytes[1..5].iter().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if bytes.len() == 9 {
        return bytes[5] == b'.' && bytes[6..9].iter().all(|b| b.is_ascii_digit());
    }
    true
}

/// Normalize a threat-actor name: trim and collapse internal whitespace.
/// Case is preserved — canonical names keep their reported capitalization,
/// and matching is case-insensitive elsewhere.
pub fn normalize_actor(raw: &str) -> Result<String, NormalizeError> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(NormalizeError::Empty);
    }
    Ok(collapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refang_undoes_common_conventions() {
        assert_eq!(refang("1.2.3[.]4"), "1.2.3.4");
        assert_eq!(refang("hxxp://evil[.]com/payload"), "http://evil.com/payload");
        assert_eq!(refang("evil[dot]com"), "evil.com");
        assert_eq!(refang("user[@]evil.com"), "user@evil.com");
    }

    #[test]
    fn ipv4_is_validated_and_canonicalized() {
        assert_eq!(normalize_indicator("198.51.100.7").unwrap(), "198.51.100.7");
        assert_eq!(normalize_indicator("010.001.1.1").unwrap(), "10.1.1.1");
        assert!(matches!(
            normalize_indicator("198.51.100.999"),
            Err(NormalizeError::MalformedIp(_))
        ));
        assert!(matches!(
            normalize_indicator("300.1.2.3"),
            Err(NormalizeError::MalformedIp(_))
        ));
    }

    #[test]
    fn hashes_and_domains_are_lowercased() {
        assert_eq!(
            normalize_indicator("D41D8CD98F00B204E9800998ECF8427E").unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(normalize_indicator("  EVIL.Example.COM ").unwrap(), "evil.example.com");
        assert_eq!(normalize_indicator("Admin@Evil.com").unwrap(), "admin@evil.com");
    }

    #[test]
    fn urls_keep_path_case() {
        assert_eq!(
            normalize_indicator("HTTP://Evil.COM/DropPer.exe").unwrap(),
            "http://evil.com/DropPer.exe"
        );
    }

    #[test]
    fn opaque_indicators_pass_through() {
        assert_eq!(
            normalize_indicator("Global\\MsWinZonesCacheCounterMutexA").unwrap(),
            "Global\\MsWinZonesCacheCounterMutexA"
        );
    }

    #[test]
    fn empty_values_are_rejected() {
        assert_eq!(normalize_indicator("   "), Err(NormalizeError::Empty));
        assert_eq!(normalize_technique(""), Err(NormalizeError::Empty));
        assert_eq!(normalize_actor(" \t "), Err(NormalizeError::Empty));
    }

    #[test]
    fn technique_ids_uppercase_names_lowercase() {
        assert_eq!(normalize_technique("t1566.001").unwrap(), "T1566.001");
        assert_eq!(normalize_technique("T1059").unwrap(), "T1059");
        assert_eq!(normalize_technique("Spearphishing Attachment").unwrap(), "spearphishing attachment");
        // Not quite an id: treated as free text
        assert_eq!(normalize_technique("T15").unwrap(), "t15");
    }

    #[test]
    fn actor_whitespace_is_collapsed() {
        assert_eq!(normalize_actor("  Fancy   Bear ").unwrap(), "Fancy Bear");
    }
}
