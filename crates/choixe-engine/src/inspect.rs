//! Static inspection of compiled configurations.

use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::path::absolute;

use choixe_ast::Node;
use choixe_ast::Value;
use choixe_ast::compile;
use indexmap::IndexMap;
use path_clean::clean;
use tracing::debug;

use crate::DocumentLoader;

/// The metadata gathered by statically walking a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    /// The variables the configuration may look up, as a nested tree.
    ///
    /// Leaves hold the literal default when one is statically known and null
    /// otherwise; loop iterables appear as empty sequences.
    pub variables: Value,
    /// The environment-backed variables, in the same shape.
    pub environ: Value,
    /// The absolute paths of statically resolvable imports, including
    /// transitive ones.
    pub imports: BTreeSet<PathBuf>,
    /// Whether an import path could not be resolved without a context.
    ///
    /// Dynamic imports are not walked into, so the report may be incomplete
    /// when this is set.
    pub dynamic_imports: bool,
    /// The literal symbols invoked by `$call` and `$model` forms.
    pub symbols: BTreeSet<String>,
    /// Whether any directive was encountered at all.
    pub processed: bool,
}

impl Default for Inspection {
    fn default() -> Self {
        Self {
            variables: Value::Map(IndexMap::new()),
            environ: Value::Map(IndexMap::new()),
            imports: BTreeSet::new(),
            dynamic_imports: false,
            symbols: BTreeSet::new(),
            processed: false,
        }
    }
}

/// Inserts a dotted identifier into a nested variable tree.
///
/// A known default is never erased by a later sighting of the same variable
/// without one, and a leaf already recorded is never demoted when the same
/// name reappears as a prefix of a longer identifier.
fn deep_set(tree: &mut Value, id: &str, leaf: Value) {
    let mut current = tree;
    let mut parts = id.split('.').peekable();
    while let Some(part) = parts.next() {
        let Value::Map(map) = current else {
            return;
        };

        if parts.peek().is_none() {
            let entry = map.entry(part.to_string()).or_insert(Value::Null);
            if matches!(entry, Value::Null) && !matches!(leaf, Value::Null) {
                *entry = leaf;
            }
            return;
        }

        let entry = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Map(IndexMap::new()));
        if matches!(entry, Value::Null) {
            *entry = Value::Map(IndexMap::new());
        }
        current = entry;
    }
}

/// Statically inspects compiled configurations.
///
/// Inspection mirrors evaluation but never invokes symbols, reads the
/// environment, or fails: every `$sweep` branch is walked, and information
/// that would require a context is simply absent from the report.
#[derive(Default)]
pub struct Inspector<'a> {
    /// The loader used to recurse into statically resolvable imports.
    loader: Option<&'a dyn DocumentLoader>,
    /// The directory relative import paths resolve against.
    base_dir: Option<PathBuf>,
}

impl std::fmt::Debug for Inspector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl<'a> Inspector<'a> {
    /// Creates an inspector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the loader used to recurse into statically resolvable imports.
    ///
    /// Without one, imports are recorded but not walked into.
    pub fn with_loader(mut self, loader: &'a dyn DocumentLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Sets the directory relative import paths resolve against.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Walks a compiled configuration and gathers its metadata.
    pub fn inspect(&self, node: &Node) -> Inspection {
        let mut walker = Walker {
            loader: self.loader,
            base_dir: self.base_dir.clone(),
            visited: BTreeSet::new(),
            out: Inspection::default(),
        };
        walker.walk(node);
        walker.out
    }
}

/// The mutable state of one inspection walk.
struct Walker<'a> {
    /// The loader used for static import recursion.
    loader: Option<&'a dyn DocumentLoader>,
    /// The directory of the document currently being walked.
    base_dir: Option<PathBuf>,
    /// Every import resolved so far; revisits terminate recursion.
    visited: BTreeSet<PathBuf>,
    /// The report being built.
    out: Inspection,
}

impl Walker<'_> {
    /// Walks one node.
    fn walk(&mut self, node: &Node) {
        match node {
            Node::Literal(_) => {}
            Node::Map(map) => {
                for entry in &map.entries {
                    self.walk(&entry.key);
                    self.walk(&entry.value);
                }
            }
            Node::Sequence(sequence) => {
                for item in &sequence.items {
                    self.walk(item);
                }
            }
            Node::Bundle(bundle) => {
                for part in &bundle.parts {
                    self.walk(part);
                }
            }
            Node::Variable(variable) => {
                self.out.processed = true;
                let default = match variable.default.as_deref() {
                    Some(Node::Literal(value)) => value.clone(),
                    _ => Value::Null,
                };
                let tree = if variable.env {
                    &mut self.out.environ
                } else {
                    &mut self.out.variables
                };
                deep_set(tree, &variable.id, default);

                if let Some(default) = &variable.default {
                    self.walk(default);
                }
            }
            Node::Import(import) => {
                self.out.processed = true;
                match &*import.target {
                    Node::Literal(value) if value.as_str().is_some() => {
                        self.import(value.as_str().expect("the literal should be a string"));
                    }
                    target => {
                        self.out.dynamic_imports = true;
                        self.walk(target);
                    }
                }
            }
            Node::Sweep(sweep) => {
                self.out.processed = true;
                for option in &sweep.options {
                    self.walk(option);
                }
            }
            Node::Call(call) => {
                self.out.processed = true;
                self.symbol(&call.symbol);
                for entry in &call.args.entries {
                    self.walk(&entry.key);
                    self.walk(&entry.value);
                }
            }
            Node::Model(model) => {
                self.out.processed = true;
                self.symbol(&model.symbol);
                for entry in &model.args.entries {
                    self.walk(&entry.key);
                    self.walk(&entry.value);
                }
            }
            Node::For(node) => {
                self.out.processed = true;
                deep_set(
                    &mut self.out.variables,
                    &node.iterable,
                    Value::Sequence(Vec::new()),
                );
                self.walk(&node.body);
            }
            Node::Item(_) | Node::Index(_) => {
                // Loop-bound, not context variables.
                self.out.processed = true;
            }
        }
    }

    /// Records a symbol expression, keeping literal symbols and walking
    /// dynamic ones.
    fn symbol(&mut self, symbol: &Node) {
        match symbol {
            Node::Literal(value) => {
                if let Some(name) = value.as_str() {
                    self.out.symbols.insert(name.to_string());
                }
            }
            dynamic => self.walk(dynamic),
        }
    }

    /// Records a statically known import and recurses into it.
    ///
    /// Failures to resolve, load, or compile terminate recursion silently;
    /// inspection never raises.
    fn import(&mut self, relative: &str) {
        let candidate = match &self.base_dir {
            Some(base) => base.join(relative),
            None => PathBuf::from(relative),
        };
        let Ok(resolved) = absolute(&candidate).map(clean) else {
            self.out.dynamic_imports = true;
            return;
        };

        if !self.visited.insert(resolved.clone()) {
            return;
        }
        self.out.imports.insert(resolved.clone());

        let Some(loader) = self.loader else {
            return;
        };
        let Ok(tree) = loader.load(&resolved) else {
            debug!(path = %resolved.display(), "skipping unloadable import");
            return;
        };
        let Ok(ast) = compile(&tree) else {
            debug!(path = %resolved.display(), "skipping uncompilable import");
            return;
        };

        let parent = resolved.parent().map(Path::to_path_buf);
        let saved = std::mem::replace(&mut self.base_dir, parent);
        self.walk(&ast);
        self.base_dir = saved;
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_deep_set() {
        let mut tree = Value::Map(IndexMap::new());
        deep_set(&mut tree, "a.b", Value::Null);
        deep_set(&mut tree, "a.c", Value::Int(5));
        deep_set(&mut tree, "a.c", Value::Null);
        deep_set(&mut tree, "d", Value::String("x".to_string()));

        assert_eq!(tree.lookup("a.b"), Some(&Value::Null));
        assert_eq!(tree.lookup("a.c"), Some(&Value::Int(5)));
        assert_eq!(tree.lookup("d"), Some(&Value::String("x".to_string())));
    }

    #[test]
    fn test_deep_set_upgrades_null_leaves() {
        let mut tree = Value::Map(IndexMap::new());
        deep_set(&mut tree, "a", Value::Null);
        deep_set(&mut tree, "a.b", Value::Int(1));

        assert_eq!(tree.lookup("a.b"), Some(&Value::Int(1)));
    }
}
