//! Evaluation of compiled configurations.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::path::absolute;

use choixe_ast::AccessPath;
use choixe_ast::BodyMode;
use choixe_ast::BundleNode;
use choixe_ast::CompileError;
use choixe_ast::ForNode;
use choixe_ast::ImportNode;
use choixe_ast::IndexNode;
use choixe_ast::ItemNode;
use choixe_ast::MapNode;
use choixe_ast::Node;
use choixe_ast::SequenceNode;
use choixe_ast::SweepNode;
use choixe_ast::Value;
use choixe_ast::VariableNode;
use choixe_ast::compile;
use indexmap::IndexMap;
use path_clean::clean;
use tracing::debug;
use tracing::trace;

use crate::DocumentLoader;
use crate::SymbolResolver;

/// The kinds of evaluation errors.
#[derive(thiserror::Error, Debug)]
pub enum ErrorKind {
    /// A variable was not found in the context.
    #[error("variable `{0}` is not defined in the context")]
    UnresolvedVariable(String),

    /// An environment-backed variable was found in neither the context nor
    /// the environment.
    #[error("variable `{0}` is defined in neither the context nor the environment")]
    UnresolvedEnvVariable(String),

    /// A value had the wrong kind for the operation consuming it.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        /// What the operation required.
        expected: &'static str,
        /// The kind of the value actually produced.
        found: &'static str,
    },

    /// An import revisited a document that is still being resolved.
    #[error("import cycle through `{path}`", path = .0.display())]
    ImportCycle(PathBuf),

    /// An imported document could not be loaded.
    #[error("failed to import `{path}`", path = .path.display())]
    ImportNotFound {
        /// The absolute path of the document.
        path: PathBuf,
        /// The loader's error.
        #[source]
        source: anyhow::Error,
    },

    /// An imported document failed to compile.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A symbol could not be resolved to a callable.
    #[error("failed to resolve symbol `{symbol}`")]
    SymbolResolution {
        /// The symbol string being resolved.
        symbol: String,
        /// The resolver's error.
        #[source]
        source: anyhow::Error,
    },

    /// An invoked callable failed.
    #[error("call to `{symbol}` failed")]
    CallFailed {
        /// The symbol that was invoked.
        symbol: String,
        /// The callable's error.
        #[source]
        source: anyhow::Error,
    },

    /// A `$model` symbol did not resolve to a structured-data constructor.
    #[error("symbol `{0}` is not a model")]
    NotAModel(String),

    /// An `$item` or `$index` reference matched no enclosing loop.
    #[error("`{0}` does not reference an enclosing loop")]
    UnknownLoopRef(String),

    /// Two map keys evaluated to the same text.
    #[error("duplicate map key `{0}`")]
    DuplicateKey(String),
}

/// An error produced while evaluating a configuration.
#[derive(Debug)]
pub struct Error {
    /// What went wrong.
    pub kind: ErrorKind,
    /// The location of the node being evaluated.
    ///
    /// Inside an imported document the path is relative to that document's
    /// root.
    pub path: AccessPath,
}

impl Error {
    /// Creates an error at an evaluation location.
    fn at(kind: ErrorKind, path: &AccessPath) -> Self {
        Self {
            kind,
            path: path.clone(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{kind} at `{path}`", kind = self.kind, path = self.path)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// How the processor treats branching nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Sweeps collapse to their first option.
    First,
    /// Sweeps branch into the full cartesian product.
    All,
}

/// A loop frame: the state of one enclosing `$for` iteration.
#[derive(Debug)]
struct Frame {
    /// The loop identifier.
    id: String,
    /// The element currently being iterated.
    item: Value,
    /// The zero-based position of the element.
    index: usize,
}

/// Combines per-child alternative lists into full rows.
///
/// The ordering is normative: the first list varies slowest and the last
/// varies fastest, so sweeps encountered later in document order cycle
/// faster. The product of zero lists is a single empty row.
fn cartesian(lists: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = vec![Vec::with_capacity(lists.len())];
    for list in lists {
        let mut next = Vec::with_capacity(rows.len() * list.len());
        for row in &rows {
            for value in &list {
                let mut row = row.clone();
                row.push(value.clone());
                next.push(row);
            }
        }
        rows = next;
    }

    rows
}

/// Evaluates compiled configurations against a runtime context.
///
/// The compiled tree itself is never mutated; all evaluation state (the
/// import stack, the loop stack, the current base directory) lives in the
/// processor, so one configuration may be processed any number of times.
pub struct Processor<'a> {
    /// The context that variables and loop iterables resolve against.
    context: &'a Value,
    /// The loader backing `$import` directives.
    loader: Option<&'a dyn DocumentLoader>,
    /// The resolver backing `$call` and `$model` forms.
    symbols: Option<&'a dyn SymbolResolver>,
    /// The directory the current document's relative imports resolve
    /// against.
    base_dir: Option<PathBuf>,
    /// Whether sweeps branch or collapse.
    mode: Mode,
    /// The absolute paths of the documents currently being imported.
    imports: Vec<PathBuf>,
    /// The active loop frames, innermost last.
    frames: Vec<Frame>,
}

impl fmt::Debug for Processor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("base_dir", &self.base_dir)
            .field("mode", &self.mode)
            .field("imports", &self.imports)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl<'a> Processor<'a> {
    /// Creates a processor over the given context.
    pub fn new(context: &'a Value) -> Self {
        Self {
            context,
            loader: None,
            symbols: None,
            base_dir: None,
            mode: Mode::First,
            imports: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Sets the loader backing `$import` directives.
    pub fn with_loader(mut self, loader: &'a dyn DocumentLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Sets the resolver backing `$call` and `$model` forms.
    pub fn with_symbols(mut self, symbols: &'a dyn SymbolResolver) -> Self {
        self.symbols = Some(symbols);
        self
    }

    /// Sets the directory relative import paths resolve against.
    ///
    /// When unset, relative imports resolve against the process working
    /// directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Resolves the configuration to a single tree.
    ///
    /// Every `$sweep` collapses to its first option.
    pub fn process(&mut self, node: &Node) -> Result<Value, Error> {
        self.mode = Mode::First;
        self.imports.clear();
        self.frames.clear();

        Ok(self
            .eval(node)?
            .into_iter()
            .next()
            .expect("non-branching evaluation should produce exactly one tree"))
    }

    /// Resolves the configuration to every branch of its cartesian product.
    ///
    /// The product is row-major over the independent sweeps in document
    /// order: the last sweep varies fastest.
    pub fn process_all(&mut self, node: &Node) -> Result<Vec<Value>, Error> {
        self.mode = Mode::All;
        self.imports.clear();
        self.frames.clear();

        self.eval(node)
    }

    /// Evaluates one node into its list of alternatives.
    ///
    /// Non-branching nodes always produce exactly one alternative.
    fn eval(&mut self, node: &Node) -> Result<Vec<Value>, Error> {
        match node {
            Node::Literal(value) => Ok(vec![value.clone()]),
            Node::Map(node) => self.eval_map(node),
            Node::Sequence(node) => self.eval_sequence(node),
            Node::Bundle(node) => self.eval_bundle(node),
            Node::Variable(node) => self.eval_variable(node),
            Node::Import(node) => self.eval_import(node),
            Node::Sweep(node) => self.eval_sweep(node),
            Node::Call(node) => self.eval_invocation(&node.symbol, &node.args, &node.path, false),
            Node::Model(node) => self.eval_invocation(&node.symbol, &node.args, &node.path, true),
            Node::For(node) => self.eval_for(node),
            Node::Item(node) => self.eval_item(node),
            Node::Index(node) => self.eval_index(node),
        }
    }

    /// Evaluates a map node.
    ///
    /// Keys participate in branching exactly like values; after evaluation a
    /// key is coerced to text, and two entries landing on the same text is
    /// an error.
    fn eval_map(&mut self, node: &MapNode) -> Result<Vec<Value>, Error> {
        let mut lists = Vec::with_capacity(node.entries.len() * 2);
        for entry in &node.entries {
            lists.push(self.eval(&entry.key)?);
            lists.push(self.eval(&entry.value)?);
        }

        let mut alternatives = Vec::new();
        for row in cartesian(lists) {
            let mut map = IndexMap::with_capacity(node.entries.len());
            let mut parts = row.into_iter();
            while let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                let key = key.to_text().ok_or_else(|| {
                    Error::at(
                        ErrorKind::TypeMismatch {
                            expected: "a textual map key",
                            found: key.kind(),
                        },
                        &node.path,
                    )
                })?;
                if map.insert(key.clone(), value).is_some() {
                    return Err(Error::at(ErrorKind::DuplicateKey(key), &node.path));
                }
            }

            alternatives.push(Value::Map(map));
        }

        Ok(alternatives)
    }

    /// Evaluates a sequence node.
    fn eval_sequence(&mut self, node: &SequenceNode) -> Result<Vec<Value>, Error> {
        let lists = node
            .items
            .iter()
            .map(|item| self.eval(item))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(cartesian(lists).into_iter().map(Value::Sequence).collect())
    }

    /// Evaluates a bundle node by concatenating the textual form of its
    /// parts.
    fn eval_bundle(&mut self, node: &BundleNode) -> Result<Vec<Value>, Error> {
        let lists = node
            .parts
            .iter()
            .map(|part| self.eval(part))
            .collect::<Result<Vec<_>, _>>()?;

        let mut alternatives = Vec::new();
        for row in cartesian(lists) {
            let mut text = String::new();
            for value in row {
                text.push_str(&value.to_text().ok_or_else(|| {
                    Error::at(
                        ErrorKind::TypeMismatch {
                            expected: "a textual value inside a string",
                            found: value.kind(),
                        },
                        &node.path,
                    )
                })?);
            }

            alternatives.push(Value::String(text));
        }

        Ok(alternatives)
    }

    /// Evaluates a `$var` directive.
    ///
    /// Lookup order: context, then the environment when `env` is set, then
    /// the default. Environment values are always strings.
    fn eval_variable(&mut self, node: &VariableNode) -> Result<Vec<Value>, Error> {
        if let Some(value) = self.context.lookup(&node.id) {
            trace!(id = node.id.as_str(), "variable resolved from the context");
            return Ok(vec![value.clone()]);
        }

        if node.env {
            if let Ok(value) = std::env::var(&node.id) {
                trace!(id = node.id.as_str(), "variable resolved from the environment");
                return Ok(vec![Value::String(value)]);
            }
        }

        if let Some(default) = &node.default {
            return self.eval(default);
        }

        Err(Error::at(
            if node.env {
                ErrorKind::UnresolvedEnvVariable(node.id.clone())
            } else {
                ErrorKind::UnresolvedVariable(node.id.clone())
            },
            &node.path,
        ))
    }

    /// Evaluates a `$sweep` directive.
    fn eval_sweep(&mut self, node: &SweepNode) -> Result<Vec<Value>, Error> {
        match self.mode {
            Mode::First => self.eval(&node.options[0]),
            Mode::All => {
                let mut alternatives = Vec::new();
                for option in &node.options {
                    alternatives.extend(self.eval(option)?);
                }

                Ok(alternatives)
            }
        }
    }

    /// Evaluates an `$import` directive.
    fn eval_import(&mut self, node: &ImportNode) -> Result<Vec<Value>, Error> {
        let mut alternatives = Vec::new();
        for target in self.eval(&node.target)? {
            let Some(relative) = target.as_str() else {
                return Err(Error::at(
                    ErrorKind::TypeMismatch {
                        expected: "a string import path",
                        found: target.kind(),
                    },
                    &node.path,
                ));
            };

            alternatives.extend(self.import(relative, &node.path)?);
        }

        Ok(alternatives)
    }

    /// Loads, compiles, and evaluates one imported document.
    fn import(&mut self, relative: &str, at: &AccessPath) -> Result<Vec<Value>, Error> {
        let candidate = match &self.base_dir {
            Some(base) => base.join(relative),
            None => PathBuf::from(relative),
        };
        let resolved = clean(absolute(&candidate).map_err(|e| {
            Error::at(
                ErrorKind::ImportNotFound {
                    path: candidate.clone(),
                    source: e.into(),
                },
                at,
            )
        })?);

        if self.imports.contains(&resolved) {
            return Err(Error::at(ErrorKind::ImportCycle(resolved), at));
        }

        let Some(loader) = self.loader else {
            return Err(Error::at(
                ErrorKind::ImportNotFound {
                    path: resolved,
                    source: anyhow::anyhow!("no document loader is configured"),
                },
                at,
            ));
        };

        debug!(path = %resolved.display(), "loading imported document");
        let tree = loader.load(&resolved).map_err(|source| {
            Error::at(
                ErrorKind::ImportNotFound {
                    path: resolved.clone(),
                    source,
                },
                at,
            )
        })?;
        let ast = compile(&tree).map_err(|e| Error::at(e.into(), at))?;

        // The imported document's own relative imports resolve against its
        // directory.
        let parent = resolved.parent().map(Path::to_path_buf);
        let saved = std::mem::replace(&mut self.base_dir, parent);
        self.imports.push(resolved);
        let result = self.eval(&ast);
        self.imports.pop();
        self.base_dir = saved;

        result
    }

    /// Evaluates a `$call` or `$model` form.
    fn eval_invocation(
        &mut self,
        symbol: &Node,
        args: &MapNode,
        path: &AccessPath,
        model: bool,
    ) -> Result<Vec<Value>, Error> {
        let symbols = self.eval(symbol)?;
        let arg_sets = self.eval_map(args)?;

        let mut alternatives = Vec::new();
        for symbol in &symbols {
            let Some(name) = symbol.as_str() else {
                return Err(Error::at(
                    ErrorKind::TypeMismatch {
                        expected: "a string symbol",
                        found: symbol.kind(),
                    },
                    path,
                ));
            };

            let Some(resolver) = self.symbols else {
                return Err(Error::at(
                    ErrorKind::SymbolResolution {
                        symbol: name.to_string(),
                        source: anyhow::anyhow!("no symbol resolver is configured"),
                    },
                    path,
                ));
            };

            let resolved = resolver.resolve(name).map_err(|source| {
                Error::at(
                    ErrorKind::SymbolResolution {
                        symbol: name.to_string(),
                        source,
                    },
                    path,
                )
            })?;
            if model && !resolved.is_model() {
                return Err(Error::at(ErrorKind::NotAModel(name.to_string()), path));
            }

            for args in &arg_sets {
                let kwargs = match args {
                    Value::Map(map) => map.clone(),
                    _ => unreachable!("map evaluation should produce maps"),
                };

                debug!(symbol = name, "invoking symbol");
                let value = (resolved.callable())(kwargs).map_err(|source| {
                    Error::at(
                        ErrorKind::CallFailed {
                            symbol: name.to_string(),
                            source,
                        },
                        path,
                    )
                })?;
                alternatives.push(value);
            }
        }

        Ok(alternatives)
    }

    /// Evaluates a `$for` form.
    fn eval_for(&mut self, node: &ForNode) -> Result<Vec<Value>, Error> {
        let context = self.context;
        let iterable = context.lookup(&node.iterable).ok_or_else(|| {
            Error::at(
                ErrorKind::UnresolvedVariable(node.iterable.clone()),
                &node.path,
            )
        })?;
        let Value::Sequence(items) = iterable else {
            return Err(Error::at(
                ErrorKind::TypeMismatch {
                    expected: "a sequence to iterate",
                    found: iterable.kind(),
                },
                &node.path,
            ));
        };

        let mut per_iteration = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            self.frames.push(Frame {
                id: node.loop_id.clone(),
                item: item.clone(),
                index,
            });
            let result = self.eval(&node.body);
            self.frames.pop();
            per_iteration.push(result?);
        }

        // An empty iterable falls out as the identity of the combining mode:
        // the product of zero iterations is a single empty row.
        let mut alternatives = Vec::new();
        for row in cartesian(per_iteration) {
            alternatives.push(self.combine(row, node)?);
        }

        Ok(alternatives)
    }

    /// Folds the per-iteration values of one loop branch into a single
    /// value, per the loop's body mode.
    fn combine(&self, row: Vec<Value>, node: &ForNode) -> Result<Value, Error> {
        match node.mode {
            BodyMode::Map => {
                let mut merged = IndexMap::new();
                for value in row {
                    let Value::Map(map) = value else {
                        return Err(Error::at(
                            ErrorKind::TypeMismatch {
                                expected: "a map loop body",
                                found: value.kind(),
                            },
                            &node.path,
                        ));
                    };
                    // Later iterations overwrite equal keys.
                    merged.extend(map);
                }

                Ok(Value::Map(merged))
            }
            BodyMode::Sequence => {
                let mut items = Vec::new();
                for value in row {
                    let Value::Sequence(chunk) = value else {
                        return Err(Error::at(
                            ErrorKind::TypeMismatch {
                                expected: "a sequence loop body",
                                found: value.kind(),
                            },
                            &node.path,
                        ));
                    };
                    items.extend(chunk);
                }

                Ok(Value::Sequence(items))
            }
            BodyMode::Text => {
                let mut text = String::new();
                for value in row {
                    text.push_str(&value.to_text().ok_or_else(|| {
                        Error::at(
                            ErrorKind::TypeMismatch {
                                expected: "a textual loop body",
                                found: value.kind(),
                            },
                            &node.path,
                        )
                    })?);
                }

                Ok(Value::String(text))
            }
        }
    }

    /// Evaluates an `$item` directive.
    fn eval_item(&mut self, node: &ItemNode) -> Result<Vec<Value>, Error> {
        let value = match node.reference.as_deref() {
            None => {
                self.frames
                    .last()
                    .ok_or_else(|| {
                        Error::at(ErrorKind::UnknownLoopRef("$item".to_string()), &node.path)
                    })?
                    .item
                    .clone()
            }
            Some(reference) => {
                let (head, rest) = match reference.split_once('.') {
                    Some((head, rest)) => (head, Some(rest)),
                    None => (reference, None),
                };
                let frame = self.frame(head, reference, &node.path)?;
                match rest {
                    None => frame.item.clone(),
                    Some(rest) => frame
                        .item
                        .lookup(rest)
                        .ok_or_else(|| {
                            Error::at(
                                ErrorKind::UnresolvedVariable(reference.to_string()),
                                &node.path,
                            )
                        })?
                        .clone(),
                }
            }
        };

        Ok(vec![value])
    }

    /// Evaluates an `$index` directive.
    fn eval_index(&mut self, node: &IndexNode) -> Result<Vec<Value>, Error> {
        let index = match node.reference.as_deref() {
            None => {
                self.frames
                    .last()
                    .ok_or_else(|| {
                        Error::at(ErrorKind::UnknownLoopRef("$index".to_string()), &node.path)
                    })?
                    .index
            }
            Some(reference) => self.frame(reference, reference, &node.path)?.index,
        };

        Ok(vec![Value::Int(index as i64)])
    }

    /// Finds the innermost loop frame with the given identifier.
    fn frame(&self, id: &str, reference: &str, at: &AccessPath) -> Result<&Frame, Error> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.id == id)
            .ok_or_else(|| Error::at(ErrorKind::UnknownLoopRef(reference.to_string()), at))
    }
}
