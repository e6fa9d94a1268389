use std::borrow::Cow;

const VISIBLE_PREFIX: usize = 4;

/// Short, log-safe rendering of a token value.
pub fn redact_token(value: &str) -> String {
    if value.chars().count() <= VISIBLE_PREFIX * 2 {
        return "REDACTED".to_string();
    }
    let prefix: String = value.chars().take(VISIBLE_PREFIX).collect();
    format!("{prefix}...REDACTED")
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let nee = needle.as_bytes();
    if nee.is_empty() {
        return Some(0);
    }
    if nee.len() > hay.len() {
        return None;
    }

    (0..=hay.len() - nee.len()).find(|&i| hay[i..i + nee.len()].eq_ignore_ascii_case(nee))
}

fn redact_header_value(text: String, header: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    loop {
        let Some(idx) = find_ascii_case_insensitive(rest, header) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..idx + header.len()]);
        rest = &rest[idx + header.len()..];

        if let Some(stripped) = rest.strip_prefix(' ') {
            out.push(' ');
            rest = stripped;
        }

        let consumed = rest.find(['\n', '\r']).unwrap_or(rest.len());
        out.push_str("REDACTED");
        rest = &rest[consumed..];
    }
    out
}

// Covers `"token":"..."` as returned by the token endpoint.
fn redact_json_token(text: String) -> String {
    const KEY: &str = "\"token\"";
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = rest.find(KEY) {
        out.push_str(&rest[..idx + KEY.len()]);
        rest = &rest[idx + KEY.len()..];

        let after_colon = rest.trim_start();
        let Some(after_colon) = after_colon.strip_prefix(':') else {
            continue;
        };
        let value = after_colon.trim_start();
        let Some(value) = value.strip_prefix('"') else {
            continue;
        };
        let Some(end) = value.find('"') else {
            continue;
        };
        out.push_str(":\"REDACTED\"");
        rest = &value[end + 1..];
    }
    out.push_str(rest);
    out
}

pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    let mut value = input.to_string();

    value = redact_header_value(value, "Cookie:");
    value = redact_header_value(value, "X-CSRF-TOKEN:");
    value = redact_header_value(value, "Authorization: Bearer");
    value = redact_json_token(value);

    if value == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(value)
    }
}
