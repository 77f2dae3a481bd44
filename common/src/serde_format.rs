use serde::de::DeserializeOwned;
use serde::Serialize;

pub type Result<T> = anyhow::Result<T>;

/// Text formats accepted for settings documents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerdeFormat {
    Yaml,
    Json,
    Toml,
}

pub fn serialize<T: Serialize>(value: &T, format: SerdeFormat) -> Result<String> {
    let mut text = match format {
        SerdeFormat::Yaml => serde_yml::to_string(value)?,
        SerdeFormat::Json => serde_json::to_string_pretty(value)?,
        SerdeFormat::Toml => toml::to_string(value)?,
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}

pub fn deserialize<T: DeserializeOwned>(serialized: &str, format: SerdeFormat) -> Result<T> {
    match format {
        SerdeFormat::Yaml => Ok(serde_yml::from_str(serialized)?),
        SerdeFormat::Json => Ok(serde_json::from_str(serialized)?),
        SerdeFormat::Toml => Ok(toml::from_str(serialized)?),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        weight: f64,
    }

    #[test]
    fn test_hand_written_documents_parse() {
        let expected = Sample {
            name: "mesh".to_string(),
            weight: 0.25,
        };
        let yaml: Sample = deserialize("name: mesh\nweight: 0.25\n", SerdeFormat::Yaml).unwrap();
        let json: Sample =
            deserialize(r#"{"name": "mesh", "weight": 0.25}"#, SerdeFormat::Json).unwrap();
        let toml: Sample =
            deserialize("name = \"mesh\"\nweight = 0.25\n", SerdeFormat::Toml).unwrap();
        assert_eq!(yaml, expected);
        assert_eq!(json, expected);
        assert_eq!(toml, expected);
    }

    #[test]
    fn test_serialized_text_ends_with_newline() {
        let sample = Sample {
            name: "tps".to_string(),
            weight: 1.0,
        };
        let text = serialize(&sample, SerdeFormat::Json).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.contains("\"tps\""));
    }

    #[test]
    fn test_malformed_text_is_an_error() {
        let result: Result<Sample> = deserialize("{ not json", SerdeFormat::Json);
        assert!(result.is_err());
    }
}
