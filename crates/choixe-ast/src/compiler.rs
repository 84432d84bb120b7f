//! Compilation of raw trees into configuration ASTs.

use std::fmt;

use choixe_grammar::Argument;
use choixe_grammar::DirectiveCall;
use choixe_grammar::Literal;
use choixe_grammar::Token;
use choixe_grammar::is_identifier;
use choixe_grammar::tokenize;
use indexmap::IndexMap;

use crate::AccessPath;
use crate::BodyMode;
use crate::BundleNode;
use crate::CallNode;
use crate::ForNode;
use crate::ImportNode;
use crate::IndexNode;
use crate::ItemNode;
use crate::MapEntry;
use crate::MapNode;
use crate::ModelNode;
use crate::Node;
use crate::SequenceNode;
use crate::SweepNode;
use crate::Value;
use crate::VariableNode;

/// The kinds of compilation errors.
#[derive(thiserror::Error, Debug)]
pub enum CompileErrorKind {
    /// A directive failed to lex or parse.
    #[error(transparent)]
    Parse(#[from] choixe_grammar::Error),

    /// A directive name is not recognized.
    #[error("unknown directive `${0}`")]
    UnknownDirective(String),

    /// A directive was used in a form it does not support.
    #[error("{0}")]
    BadDirectiveForm(String),

    /// A directive received arguments that do not fit its schema.
    #[error("invalid arguments for `${directive}`: {reason}")]
    BadArgumentSchema {
        /// The directive whose schema was violated.
        directive: String,
        /// Why the arguments do not fit.
        reason: String,
    },

    /// A map mixes more than one special key.
    #[error("a map may contain at most one `$call`, `$model`, or `$for(...)` key")]
    MixedSpecialKeys,
}

/// An error produced while compiling a raw tree.
#[derive(Debug)]
pub struct CompileError {
    /// What went wrong.
    pub kind: CompileErrorKind,
    /// Where in the tree it went wrong.
    pub path: AccessPath,
    /// The source string being compiled, when the error came from one.
    pub source: Option<String>,
}

impl CompileError {
    /// Creates an error at a tree location.
    fn at(kind: CompileErrorKind, path: &AccessPath) -> Self {
        Self {
            kind,
            path: path.clone(),
            source: None,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{kind} at `{path}`", kind = self.kind, path = self.path)?;
        if let Some(source) = &self.source {
            write!(f, " (in `{source}`)")?;
        }

        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// Creates a schema violation error kind.
fn schema(directive: &str, reason: impl Into<String>) -> CompileErrorKind {
    CompileErrorKind::BadArgumentSchema {
        directive: directive.to_string(),
        reason: reason.into(),
    }
}

/// A directive argument normalized across the call and extended forms.
///
/// The call form only produces identifiers and literals; the extended form
/// may nest arbitrary compiled sub-trees.
enum Arg {
    /// A dotted identifier.
    Ident(String),
    /// A compiled sub-tree.
    Node(Node),
}

impl Arg {
    /// Converts a call-form argument.
    fn from_call(argument: Argument) -> Self {
        match argument {
            Argument::Ident(id) => Self::Ident(id),
            Argument::Literal(literal) => Self::Node(Node::Literal(literal.into())),
        }
    }
}

impl From<Literal> for Value {
    fn from(literal: Literal) -> Self {
        match literal {
            Literal::Null => Self::Null,
            Literal::Bool(b) => Self::Bool(b),
            Literal::Int(i) => Self::Int(i),
            Literal::Float(f) => Self::Float(f),
            Literal::String(s) => Self::String(s),
        }
    }
}

/// Converts an argument into a node, spelling bare identifiers as strings.
fn into_node(arg: Arg) -> Node {
    match arg {
        Arg::Ident(id) => Node::Literal(Value::String(id)),
        Arg::Node(node) => node,
    }
}

/// Extracts a dotted identifier from an argument.
///
/// The extended form spells identifiers as plain strings, so literal strings
/// matching the identifier grammar are accepted too.
fn into_ident(arg: Arg) -> Result<String, String> {
    match arg {
        Arg::Ident(id) => Ok(id),
        Arg::Node(Node::Literal(Value::String(s))) if is_identifier(&s) => Ok(s),
        _ => Err("expected a dotted identifier".to_string()),
    }
}

/// Extracts a boolean literal from an argument.
fn into_bool(arg: Arg) -> Result<bool, String> {
    match arg {
        Arg::Node(Node::Literal(Value::Bool(b))) => Ok(b),
        _ => Err("expected a boolean literal".to_string()),
    }
}

/// Fails on the first remaining keyword argument.
fn reject_kwargs(directive: &str, kwargs: IndexMap<String, Arg>) -> Result<(), CompileErrorKind> {
    match kwargs.into_keys().next() {
        None => Ok(()),
        Some(name) => Err(schema(
            directive,
            format!("unknown keyword argument `{name}`"),
        )),
    }
}

/// A special map key recognized during compilation.
enum Special<'a> {
    /// The `$call` key.
    Call,
    /// The `$model` key.
    Model,
    /// A `$for(...)` key, with its raw argument text.
    For(Option<&'a str>),
}

/// Compiles a raw tree into a configuration AST.
pub fn compile(tree: &Value) -> Result<Node, CompileError> {
    Compiler::default().node(tree, &AccessPath::root())
}

/// State threaded through a single compilation.
#[derive(Default)]
struct Compiler {
    /// Counter backing engine-generated loop identifiers.
    loops: usize,
}

impl Compiler {
    /// Compiles one node of the raw tree.
    fn node(&mut self, tree: &Value, path: &AccessPath) -> Result<Node, CompileError> {
        match tree {
            Value::String(s) => self.string(s, path),
            Value::Sequence(items) => Ok(Node::Sequence(SequenceNode {
                items: items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.node(item, &path.index(i)))
                    .collect::<Result<_, _>>()?,
            })),
            Value::Map(map) => self.map(map, path),
            scalar => Ok(Node::Literal(scalar.clone())),
        }
    }

    /// Compiles a scalar string, recognizing directives and bundles.
    fn string(&mut self, source: &str, path: &AccessPath) -> Result<Node, CompileError> {
        let attach = |kind: CompileErrorKind| CompileError {
            kind,
            path: path.clone(),
            source: Some(source.to_string()),
        };

        let tokens = tokenize(source).map_err(|e| attach(e.into()))?;
        match tokens.as_slice() {
            [] | [Token::Plain(_)] => Ok(Node::Literal(Value::String(source.to_string()))),
            [Token::Directive { name, args }] => {
                self.directive(name, *args, path).map_err(attach)
            }
            parts => Ok(Node::Bundle(BundleNode {
                parts: parts
                    .iter()
                    .map(|token| match *token {
                        Token::Plain(text) => Ok(Node::Literal(Value::String(text.to_string()))),
                        Token::Directive { name, args } => {
                            self.directive(name, args, path).map_err(&attach)
                        }
                    })
                    .collect::<Result<_, _>>()?,
                path: path.clone(),
            })),
        }
    }

    /// Compiles a single lexed directive occurrence.
    fn directive(
        &mut self,
        name: &str,
        args: Option<&str>,
        path: &AccessPath,
    ) -> Result<Node, CompileErrorKind> {
        let call = DirectiveCall::parse(name, args)?;
        let args = call.args.into_iter().map(Arg::from_call).collect();
        let kwargs = call
            .kwargs
            .into_iter()
            .map(|(k, v)| (k, Arg::from_call(v)))
            .collect();
        self.dispatch(&call.name, args, kwargs, path)
    }

    /// Builds the AST node for a directive from its normalized arguments.
    fn dispatch(
        &mut self,
        name: &str,
        args: Vec<Arg>,
        mut kwargs: IndexMap<String, Arg>,
        path: &AccessPath,
    ) -> Result<Node, CompileErrorKind> {
        match name {
            "var" => {
                let mut args = args.into_iter();
                let id = args
                    .next()
                    .ok_or_else(|| schema("var", "missing the variable identifier"))
                    .and_then(|arg| into_ident(arg).map_err(|reason| schema("var", reason)))?;
                if args.next().is_some() {
                    return Err(schema("var", "expected exactly one positional argument"));
                }

                let default = match kwargs.shift_remove("default") {
                    None => None,
                    Some(Arg::Ident(_)) => {
                        return Err(schema("var", "`default` must be a literal"));
                    }
                    Some(Arg::Node(node)) => Some(Box::new(node)),
                };
                let env = kwargs
                    .shift_remove("env")
                    .map(|arg| into_bool(arg).map_err(|reason| schema("var", reason)))
                    .transpose()?
                    .unwrap_or(false);
                reject_kwargs("var", kwargs)?;

                Ok(Node::Variable(VariableNode {
                    id,
                    default,
                    env,
                    path: path.clone(),
                }))
            }
            "import" => {
                let mut args = args.into_iter();
                let target = match args.next() {
                    None => return Err(schema("import", "missing the document path")),
                    Some(Arg::Ident(_)) => {
                        return Err(schema("import", "the document path must be a string"));
                    }
                    Some(Arg::Node(Node::Literal(value))) => match value.as_str() {
                        None => {
                            return Err(schema("import", "the document path must be a string"));
                        }
                        // The path string may itself carry directives, e.g.
                        // `$import("$var(root)/train.yml")`.
                        Some(s) => self.string(s, path).map_err(|e| e.kind)?,
                    },
                    Some(Arg::Node(node)) => node,
                };
                if args.next().is_some() {
                    return Err(schema("import", "expected exactly one positional argument"));
                }
                reject_kwargs("import", kwargs)?;

                Ok(Node::Import(ImportNode {
                    target: Box::new(target),
                    path: path.clone(),
                }))
            }
            "sweep" => {
                if args.is_empty() {
                    return Err(schema("sweep", "expected at least one option"));
                }
                reject_kwargs("sweep", kwargs)?;

                Ok(Node::Sweep(SweepNode {
                    options: args.into_iter().map(into_node).collect(),
                    path: path.clone(),
                }))
            }
            "item" | "index" => {
                let mut args = args.into_iter();
                let reference = args
                    .next()
                    .map(|arg| into_ident(arg).map_err(|reason| schema(name, reason)))
                    .transpose()?;
                if args.next().is_some() {
                    return Err(schema(name, "expected at most one positional argument"));
                }
                reject_kwargs(name, kwargs)?;

                Ok(if name == "item" {
                    Node::Item(ItemNode {
                        reference,
                        path: path.clone(),
                    })
                } else {
                    Node::Index(IndexNode {
                        reference,
                        path: path.clone(),
                    })
                })
            }
            "call" | "model" | "for" => Err(CompileErrorKind::BadDirectiveForm(format!(
                "`${name}` is only available as a special map key"
            ))),
            _ => Err(CompileErrorKind::UnknownDirective(name.to_string())),
        }
    }

    /// Compiles a map, recognizing the extended and special forms.
    fn map(
        &mut self,
        map: &IndexMap<String, Value>,
        path: &AccessPath,
    ) -> Result<Node, CompileError> {
        if map.contains_key("$directive") {
            return self.extended(map, path);
        }

        let mut special: Option<(&str, Special<'_>)> = None;
        for key in map.keys() {
            let found = match key.as_str() {
                "$call" => Some(Special::Call),
                "$model" => Some(Special::Model),
                key => match tokenize(key) {
                    Ok(tokens) => match tokens.as_slice() {
                        [Token::Directive { name: "for", args }] => Some(Special::For(*args)),
                        _ => None,
                    },
                    // A key that does not lex fails below, when it is
                    // compiled as an expression.
                    Err(_) => None,
                },
            };

            if let Some(found) = found {
                if special.is_some() {
                    return Err(CompileError::at(CompileErrorKind::MixedSpecialKeys, path));
                }
                special = Some((key, found));
            }
        }

        if let Some((key, special)) = special {
            return match special {
                Special::Call => self.invocation(map, path, false),
                Special::Model => self.invocation(map, path, true),
                Special::For(args) => self.repeat(map, key, args, path),
            };
        }

        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            let entry_path = path.key(key);
            entries.push(MapEntry {
                key: self.string(key, &entry_path)?,
                value: self.node(value, &entry_path)?,
            });
        }

        Ok(Node::Map(MapNode {
            entries,
            path: path.clone(),
        }))
    }

    /// Compiles a `$call` or `$model` special form.
    fn invocation(
        &mut self,
        map: &IndexMap<String, Value>,
        path: &AccessPath,
        model: bool,
    ) -> Result<Node, CompileError> {
        let form = if model { "$model" } else { "$call" };
        for key in map.keys() {
            if key != form && key != "$args" {
                return Err(CompileError::at(
                    CompileErrorKind::BadDirectiveForm(format!(
                        "`{form}` admits only an `$args` sibling, found `{key}`"
                    )),
                    path,
                ));
            }
        }

        let symbol = self.node(&map[form], &path.key(form))?;
        if let Node::Literal(value) = &symbol {
            if value.as_str().is_none() {
                return Err(CompileError::at(
                    CompileErrorKind::BadDirectiveForm(format!(
                        "the `{form}` symbol must be a string, found {}",
                        value.kind()
                    )),
                    path,
                ));
            }
        }

        let args = match map.get("$args") {
            None => MapNode {
                entries: Vec::new(),
                path: path.key("$args"),
            },
            Some(tree @ Value::Map(_)) => match self.node(tree, &path.key("$args"))? {
                Node::Map(node) => node,
                _ => {
                    return Err(CompileError::at(
                        CompileErrorKind::BadDirectiveForm(
                            "`$args` must be a plain map of keyword arguments".to_string(),
                        ),
                        path,
                    ));
                }
            },
            Some(other) => {
                return Err(CompileError::at(
                    CompileErrorKind::BadDirectiveForm(format!(
                        "`$args` must be a map, found {}",
                        other.kind()
                    )),
                    path,
                ));
            }
        };

        Ok(if model {
            Node::Model(ModelNode {
                symbol: Box::new(symbol),
                args,
                path: path.clone(),
            })
        } else {
            Node::Call(CallNode {
                symbol: Box::new(symbol),
                args,
                path: path.clone(),
            })
        })
    }

    /// Compiles a `$for(...)` special form.
    fn repeat(
        &mut self,
        map: &IndexMap<String, Value>,
        key: &str,
        args: Option<&str>,
        path: &AccessPath,
    ) -> Result<Node, CompileError> {
        if map.len() != 1 {
            return Err(CompileError::at(
                CompileErrorKind::BadDirectiveForm(
                    "a `$for(...)` key must be the only key of its map".to_string(),
                ),
                path,
            ));
        }

        let attach = |kind: CompileErrorKind| CompileError {
            kind,
            path: path.clone(),
            source: Some(key.to_string()),
        };

        let call = DirectiveCall::parse("for", args).map_err(|e| attach(e.into()))?;
        if let Some(name) = call.kwargs.keys().next() {
            return Err(attach(schema(
                "for",
                format!("unknown keyword argument `{name}`"),
            )));
        }

        let mut positional = call.args.into_iter().map(Arg::from_call);
        let iterable = positional
            .next()
            .ok_or_else(|| attach(schema("for", "missing the iterable identifier")))
            .and_then(|arg| into_ident(arg).map_err(|reason| attach(schema("for", reason))))?;
        let loop_id = positional
            .next()
            .map(|arg| into_ident(arg).map_err(|reason| attach(schema("for", reason))))
            .transpose()?;
        if positional.next().is_some() {
            return Err(attach(schema(
                "for",
                "expected at most two positional arguments",
            )));
        }

        let loop_id = match loop_id {
            Some(id) if !id.contains('.') => id,
            Some(id) => {
                return Err(attach(schema(
                    "for",
                    format!("loop identifier `{id}` may not be dotted"),
                )));
            }
            None => {
                let id = format!("@for{}", self.loops);
                self.loops += 1;
                id
            }
        };

        let body_tree = &map[key];
        let mode = match body_tree {
            Value::Map(_) => BodyMode::Map,
            Value::Sequence(_) => BodyMode::Sequence,
            Value::String(_) => BodyMode::Text,
            other => {
                return Err(CompileError::at(
                    CompileErrorKind::BadDirectiveForm(format!(
                        "a loop body must be a map, a sequence, or a string, found {}",
                        other.kind()
                    )),
                    path,
                ));
            }
        };

        Ok(Node::For(ForNode {
            iterable,
            loop_id,
            body: Box::new(self.node(body_tree, &path.key(key))?),
            mode,
            path: path.clone(),
        }))
    }

    /// Compiles an extended form map (`$directive`/`$args`/`$kwargs`).
    ///
    /// This is the only place where directive arguments may be arbitrary
    /// sub-trees.
    fn extended(
        &mut self,
        map: &IndexMap<String, Value>,
        path: &AccessPath,
    ) -> Result<Node, CompileError> {
        for key in map.keys() {
            if !matches!(key.as_str(), "$directive" | "$args" | "$kwargs") {
                return Err(CompileError::at(
                    CompileErrorKind::BadDirectiveForm(format!(
                        "the extended form admits only `$directive`, `$args`, and `$kwargs`, \
                         found `{key}`"
                    )),
                    path,
                ));
            }
        }

        let name = map["$directive"].as_str().ok_or_else(|| {
            CompileError::at(
                CompileErrorKind::BadDirectiveForm(format!(
                    "`$directive` must name a directive, found {}",
                    map["$directive"].kind()
                )),
                path,
            )
        })?;

        let args = match map.get("$args") {
            None => Vec::new(),
            Some(Value::Sequence(items)) => {
                let args_path = path.key("$args");
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Ok(Arg::Node(self.node(item, &args_path.index(i))?)))
                    .collect::<Result<_, CompileError>>()?
            }
            Some(other) => {
                return Err(CompileError::at(
                    CompileErrorKind::BadDirectiveForm(format!(
                        "`$args` must be a sequence, found {}",
                        other.kind()
                    )),
                    path,
                ));
            }
        };

        let kwargs = match map.get("$kwargs") {
            None => IndexMap::new(),
            Some(Value::Map(entries)) => {
                let kwargs_path = path.key("$kwargs");
                entries
                    .iter()
                    .map(|(k, v)| {
                        Ok((
                            k.clone(),
                            Arg::Node(self.node(v, &kwargs_path.key(k))?),
                        ))
                    })
                    .collect::<Result<_, CompileError>>()?
            }
            Some(other) => {
                return Err(CompileError::at(
                    CompileErrorKind::BadDirectiveForm(format!(
                        "`$kwargs` must be a map, found {}",
                        other.kind()
                    )),
                    path,
                ));
            }
        };

        self.dispatch(name, args, kwargs, path)
            .map_err(|kind| CompileError::at(kind, path))
    }
}
