//! Raw document decoding: YAML by default, JSON by extension-sniffing,
//! both deserializing into the same [`crate::model::Factory`] tree.

use std::path::Path;

use crate::errors::FactoryError;
use crate::model::Factory;

pub fn decode(path: &Path, raw: &str) -> Result<Factory, FactoryError> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(raw).map_err(|err| FactoryError::Decode {
            path: path.to_path_buf(),
            source: err.into(),
        })
    } else {
        serde_yaml::from_str(raw).map_err(|err| FactoryError::Decode {
            path: path.to_path_buf(),
            source: err.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn decodes_yaml_document() {
        let yaml = "name: demo\nstages:\n  - id: a\n    type: custom\n    command: \"true\"\n";
        let factory = decode(&PathBuf::from("factory.yaml"), yaml).unwrap();
        assert_eq!(factory.name, "demo");
        assert_eq!(factory.stages.len(), 1);
    }

    #[test]
    fn decodes_json_document_by_extension() {
        let json = r#"{"name": "demo", "stages": [{"id": "a", "type": "custom", "command": "true"}]}"#;
        let factory = decode(&PathBuf::from("factory.json"), json).unwrap();
        assert_eq!(factory.name, "demo");
    }

    #[test]
    fn malformed_document_is_a_decode_error() {
        let err = decode(&PathBuf::from("factory.yaml"), "not: [valid").unwrap_err();
        assert!(matches!(err, FactoryError::Decode { .. }));
    }
}
