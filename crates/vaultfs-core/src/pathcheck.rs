//! Predicate for paths that can safely land in the downstream archival
//! item format, independent of the Vault tree semantics.

/// Longest accepted path, in bytes.
pub const MAX_PATH_LENGTH: usize = 4096;

/// Longest accepted single segment, in bytes.
pub const MAX_NAME_LENGTH: usize = 255;

/// Item-name prefixes reserved by the downstream archive. Deploy-time
/// constant; extending it requires a rebuild.
pub const RESERVED_ITEM_PREFIXES: &[&str] = &["DPS-VAULT", "IA-DPS-VAULT"];

const RESERVED_SUFFIXES: &[&str] = &["_files.xml", "_meta.xml", "_meta.sqlite", "_reviews.xml"];

/// Whether `remote` can be archived downstream. UTF-8 validity is already
/// guaranteed by the argument type.
pub fn is_valid_path(remote: &str) -> bool {
    RESERVED_ITEM_PREFIXES
        .iter()
        .all(|prefix| is_valid_path_prefix(remote, prefix))
}

/// Same check against a single reserved item-name prefix.
pub fn is_valid_path_prefix(remote: &str, prefix: &str) -> bool {
    if remote.is_empty() || remote == "/" {
        return false;
    }
    if remote.len() > MAX_PATH_LENGTH {
        return false;
    }
    if remote.contains("//") {
        return false;
    }
    for segment in remote.split('/') {
        if segment == "." || segment == ".." {
            return false;
        }
        if segment.len() > MAX_NAME_LENGTH {
            return false;
        }
    }
    if remote.contains(['\x00', '\x0a', '\x0d']) {
        return false;
    }
    if !is_xml_text(remote) {
        return false;
    }
    if remote.trim_start_matches('/').starts_with(prefix)
        && RESERVED_SUFFIXES.iter().any(|s| remote.ends_with(s))
    {
        return false;
    }
    true
}

/// Whether `s` is well-formed when embedded as character data inside an XML
/// element: only valid XML characters, no raw `<`, and `&` only as part of
/// a recognized entity or character reference.
fn is_xml_text(s: &str) -> bool {
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        if !is_xml_char(c) || c == '<' {
            return false;
        }
        if c == '&' {
            let rest = &s[i + 1..];
            let Some(end) = rest.find(';') else {
                return false;
            };
            if !is_valid_reference(&rest[..end]) {
                return false;
            }
            // Skip to the terminating semicolon.
            for _ in 0..=end {
                chars.next();
            }
        }
    }
    true
}

/// XML 1.0 Char production, minus the surrogate range Rust chars already
/// exclude.
fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// The body of an entity (`amp`) or character (`#38`, `#x26`) reference.
fn is_valid_reference(body: &str) -> bool {
    match body {
        "amp" | "lt" | "gt" | "apos" | "quot" => true,
        _ => {
            let Some(num) = body.strip_prefix('#') else {
                return false;
            };
            let code = if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                u32::from_str_radix(hex, 16)
            } else {
                num.parse()
            };
            match code {
                Ok(code) => char::from_u32(code).is_some_and(is_xml_char),
                Err(_) => false,
            }
        }
    }
}
