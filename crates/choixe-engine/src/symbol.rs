//! Dynamic symbol resolution for `$call` and `$model` forms.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use anyhow::bail;
use choixe_ast::Value;
use indexmap::IndexMap;

/// The signature of a callable symbol.
///
/// Callables receive the evaluated keyword arguments of the form and return
/// the value to embed in the resolved tree, which may be opaque.
pub type SymbolFn = dyn Fn(IndexMap<String, Value>) -> Result<Value> + Send + Sync;

/// A resolved symbol.
#[derive(Clone)]
pub enum Symbol {
    /// A plain callable.
    Function(Arc<SymbolFn>),
    /// A structured-data constructor, additionally invocable from `$model`.
    Model(Arc<SymbolFn>),
}

impl Symbol {
    /// The callable backing this symbol.
    pub fn callable(&self) -> &SymbolFn {
        match self {
            Self::Function(f) | Self::Model(f) => f.as_ref(),
        }
    }

    /// Whether the symbol may back a `$model` form.
    pub fn is_model(&self) -> bool {
        matches!(self, Self::Model(_))
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Symbol::Function"),
            Self::Model(_) => f.write_str("Symbol::Model"),
        }
    }
}

/// Resolves textual symbols to callables.
pub trait SymbolResolver {
    /// Resolves a symbol string to a callable.
    ///
    /// Both the `file/path.ext:name` and the `dotted.module.name` spellings
    /// are plain strings to the engine; resolution is case-sensitive and
    /// verbatim.
    fn resolve(&self, symbol: &str) -> Result<Symbol>;
}

/// A registration table mapping symbol strings to callables.
///
/// There is no dynamic module loading here: every symbol a template invokes
/// must be registered up front under the exact string the template uses.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    /// The registered symbols.
    table: HashMap<String, Symbol>,
}

impl SymbolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plain callable under the given symbol string.
    pub fn register_function<F>(&mut self, symbol: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(IndexMap<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.table
            .insert(symbol.into(), Symbol::Function(Arc::new(f)));
        self
    }

    /// Registers a structured-data constructor under the given symbol string.
    pub fn register_model<F>(&mut self, symbol: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(IndexMap<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.table.insert(symbol.into(), Symbol::Model(Arc::new(f)));
        self
    }
}

impl SymbolResolver for SymbolRegistry {
    fn resolve(&self, symbol: &str) -> Result<Symbol> {
        match self.table.get(symbol) {
            Some(symbol) => Ok(symbol.clone()),
            None => bail!("symbol `{symbol}` is not registered"),
        }
    }
}
