//! Deserializes a byte size from either a plain number (bytes) or a unit
//! string (`"64 MiB"`), used by [`crate::OutputConfig::segment_size`].

use byte_unit::Byte;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Value {
    Number(u64),
    String(String),
}

/// Deserializes an optional byte size, accepting either a bare integer or
/// a unit-suffixed string (e.g. `"2 GiB"`).
pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(value) = value else {
        return Ok(None);
    };
    let bytes = match value {
        Value::Number(n) => n,
        Value::String(text) => {
            let parsed: Byte = text.parse().map_err(DeError::custom)?;
            parsed.as_u64()
        }
    };
    Ok(Some(bytes))
}

#[cfg(test)]
mod tests {
    use super::deserialize;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "deserialize")]
        value: Option<u64>,
    }

    #[test]
    fn parses_bare_number() {
        let h: Holder = serde_json::from_str(r#"{"value": 1024}"#).unwrap();
        assert_eq!(h.value, Some(1024));
    }

    #[test]
    fn parses_unit_suffixed_string() {
        let h: Holder = serde_json::from_str(r#"{"value": "2 MiB"}"#).unwrap();
        assert_eq!(h.value, Some(2 * 1024 * 1024));
    }
}
