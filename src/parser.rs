//! Parsing of salt API responses into a complete bundle

use std::collections::BTreeMap;
use tracing::debug;

use crate::define::find_defines;
use crate::error::{Result, RotationError};
use crate::keys::SecretKey;

/// One freshly fetched key or salt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretDefinition {
    pub key: SecretKey,
    pub value: String,
    /// The statement exactly as it will be written into wp-config.php
    pub rendered_line: String,
}

/// A validated set holding a definition for every [`SecretKey`]
///
/// Only [`parse`] builds one, and it refuses to unless all eight keys are present.
#[derive(Debug, Clone)]
pub struct SecretBundle {
    definitions: BTreeMap<SecretKey, SecretDefinition>,
}

impl SecretBundle {
    pub fn get(&self, key: SecretKey) -> &SecretDefinition {
        &self.definitions[&key]
    }

    /// Definitions in canonical key order
    pub fn iter(&self) -> impl Iterator<Item = &SecretDefinition> {
        SecretKey::ALL.iter().map(move |k| self.get(*k))
    }
}

/// Parse raw salt API text
///
/// Lines may end in `\n`, `\r\n` or `\r`. When a name appears more than once the last
/// definition wins. Unknown names are ignored.
pub fn parse(raw: &str) -> Result<SecretBundle> {
    let mut definitions = BTreeMap::new();

    for line in raw.split(|c: char| c == '\r' || c == '\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        for m in find_defines(line.as_bytes()) {
            let Ok(key) = m.name.parse::<SecretKey>() else {
                debug!("Ignoring unrelated definition {}", m.name);
                continue;
            };
            definitions.insert(
                key,
                SecretDefinition {
                    key,
                    value: String::from_utf8_lossy(m.value).into_owned(),
                    rendered_line: line[m.span].to_string(),
                },
            );
        }
    }

    let missing: Vec<SecretKey> = SecretKey::ALL
        .into_iter()
        .filter(|k| !definitions.contains_key(k))
        .collect();
    if !missing.is_empty() {
        return Err(RotationError::IncompleteSecretSet { missing });
    }

    Ok(SecretBundle { definitions })
}
