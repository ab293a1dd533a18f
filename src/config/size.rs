// Memory size values: plain byte counts or strings such as "200M"

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Bytes(u64),
    Text(String),
}

/// Parse a human-readable size into bytes. Suffixes use 1024 multiples.
pub fn parse_size(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);
    let value: u64 = digits.parse().ok()?;

    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        _ => return None,
    };

    value.checked_mul(multiplier)
}

pub(crate) fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<SizeValue>::deserialize(deserializer)? {
        None => Ok(None),
        Some(SizeValue::Bytes(bytes)) => Ok(Some(bytes)),
        Some(SizeValue::Text(text)) => parse_size(&text).map(Some).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid memory size '{}', expected bytes or a value like 200M",
                text
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_bytes() {
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("512B"), Some(512));
    }

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_size("200M"), Some(200 * 1024 * 1024));
        assert_eq!(parse_size("200mb"), Some(200 * 1024 * 1024));
        assert_eq!(parse_size("4K"), Some(4096));
        assert_eq!(parse_size("1G"), Some(1024 * 1024 * 1024));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("M"), None);
        assert_eq!(parse_size("12T"), None);
        assert_eq!(parse_size("1.5G"), None);
    }
}
