//! Loading of imported documents.

use std::fs;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use choixe_ast::Value;

/// Loads a named document into a raw tree.
///
/// The engine resolves import paths to absolute paths before asking the
/// loader; implementations only read and decode.
pub trait DocumentLoader {
    /// Loads the document at the given absolute path.
    fn load(&self, path: &Path) -> Result<Value>;
}

/// A loader reading markup documents from the local filesystem.
///
/// Documents with a `.json` extension decode as JSON; everything else
/// decodes as YAML.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl DocumentLoader for FsLoader {
    fn load(&self, path: &Path) -> Result<Value> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read `{path}`", path = path.display()))?;

        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        {
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse `{path}` as JSON", path = path.display()))
        } else {
            serde_yaml_ng::from_str(&text)
                .with_context(|| format!("failed to parse `{path}` as YAML", path = path.display()))
        }
    }
}
