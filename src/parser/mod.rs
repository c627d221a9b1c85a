//! Document parsing and the template/expression grammar (spec §4.1).

pub mod document;
pub mod expr;
pub mod template;

use std::path::Path;

use crate::errors::FactoryError;
use crate::model::Factory;

/// **Parse(path) → (Factory, warnings) | error.**
pub fn parse(path: &Path) -> Result<(Factory, Vec<String>), FactoryError> {
    let raw = std::fs::read_to_string(path).map_err(|source| FactoryError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut factory = document::decode(path, &raw)?;
    let warnings = factory.validate()?;
    factory.source_path = Some(path.to_path_buf());
    Ok((factory, warnings))
}
