//! Parsing of directive argument lists.

use indexmap::IndexMap;
use logos::Logos;

use crate::Error;

/// A literal directive argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// The null literal.
    Null,
    /// A boolean literal.
    Bool(bool),
    /// An integer literal.
    Int(i64),
    /// A float literal.
    Float(f64),
    /// A quoted string literal, with escape sequences resolved.
    String(String),
}

/// A single directive argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// A literal value.
    Literal(Literal),
    /// A dotted identifier.
    Ident(String),
}

/// A structured directive occurrence.
///
/// This is the output of raw argument parsing; schema enforcement (arity and
/// keyword names per directive) happens when the call is turned into an AST
/// node.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveCall {
    /// The directive name, without the leading `$`.
    pub name: String,
    /// The positional arguments, in order.
    pub args: Vec<Argument>,
    /// The keyword arguments, in order of appearance.
    pub kwargs: IndexMap<String, Argument>,
}

/// Represents a token inside a directive argument list.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(error = Error)]
enum ArgToken {
    /// Contiguous whitespace.
    #[regex(r"[ \t\r\n]+")]
    Whitespace,

    /// The argument separator.
    #[token(",")]
    Comma,

    /// The keyword assignment sign.
    #[token("=")]
    Assign,

    /// An integer literal.
    #[regex(r"-?[0-9]+")]
    Integer,

    /// A float literal.
    #[regex(r"-?(?:[0-9]+\.[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?|-?[0-9]+[eE][+-]?[0-9]+")]
    Float,

    /// A double quoted string literal.
    #[regex(r#""(?:[^"\\]|\\.)*""#)]
    DoubleQuoted,

    /// A single quoted string literal.
    #[regex(r"'(?:[^'\\]|\\.)*'")]
    SingleQuoted,

    /// A dotted identifier or keyword.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*")]
    Ident,

    /// A stray dot adjacent to an identifier.
    #[token(".")]
    Dot,
}

/// Resolves the escape sequences of a quoted string literal.
///
/// The surrounding quotes are part of the input. Recognized escapes are
/// `\n`, `\t`, `\\`, `\'`, and `\"`.
fn unescape(quoted: &str) -> Result<String, Error> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                return Err(Error::BadArgumentSyntax(format!(
                    "unsupported escape sequence `\\{other}`"
                )));
            }
            None => {
                return Err(Error::BadArgumentSyntax(
                    "dangling escape at end of string".to_string(),
                ));
            }
        }
    }

    Ok(out)
}

/// Converts a value token into an argument.
///
/// Identifiers spelling a boolean or null keyword (case-insensitive) become
/// literals; any other identifier stays symbolic.
fn value(token: ArgToken, slice: &str) -> Result<Argument, Error> {
    match token {
        ArgToken::Integer => slice
            .parse()
            .map(|i| Argument::Literal(Literal::Int(i)))
            .map_err(|_| Error::BadArgumentSyntax(format!("integer `{slice}` is out of range"))),
        ArgToken::Float => slice
            .parse()
            .map(|f| Argument::Literal(Literal::Float(f)))
            .map_err(|_| Error::BadArgumentSyntax(format!("`{slice}` is not a valid float"))),
        ArgToken::DoubleQuoted | ArgToken::SingleQuoted => {
            Ok(Argument::Literal(Literal::String(unescape(slice)?)))
        }
        ArgToken::Ident => Ok(match slice.to_ascii_lowercase().as_str() {
            "true" => Argument::Literal(Literal::Bool(true)),
            "false" => Argument::Literal(Literal::Bool(false)),
            "null" | "none" => Argument::Literal(Literal::Null),
            _ => Argument::Ident(slice.to_string()),
        }),
        ArgToken::Dot => Err(Error::BadIdentifier(slice.to_string())),
        _ => Err(Error::BadArgumentSyntax(format!(
            "expected an argument value, found `{slice}`"
        ))),
    }
}

impl DirectiveCall {
    /// Parses a directive occurrence from its name and raw argument text.
    ///
    /// `args` is `None` for the compact form, which carries no arguments at
    /// all. Positional arguments must precede keyword arguments and keyword
    /// names may not repeat.
    pub fn parse(name: &str, args: Option<&str>) -> Result<Self, Error> {
        let mut call = Self {
            name: name.to_string(),
            args: Vec::new(),
            kwargs: IndexMap::new(),
        };

        let Some(args) = args else {
            return Ok(call);
        };

        // Materialize the token stream up front; it is tiny and lookahead
        // for `ident =` becomes trivial.
        let mut tokens = Vec::new();
        let mut lexer = ArgToken::lexer(args);
        while let Some(result) = lexer.next() {
            let token = result?;
            if token != ArgToken::Whitespace {
                // A dot only occurs detached when a dotted identifier is
                // malformed; report the whole argument text.
                if token == ArgToken::Dot {
                    return Err(Error::BadIdentifier(args.trim().to_string()));
                }
                tokens.push((token, lexer.slice()));
            }
        }

        if tokens.is_empty() {
            return Ok(call);
        }

        let mut cursor = 0;
        loop {
            // One element: either `name = value` or a bare value.
            match tokens[cursor..] {
                [(ArgToken::Ident, name), (ArgToken::Assign, _), (token, slice), ..] => {
                    if name.contains('.') {
                        return Err(Error::BadArgumentSyntax(format!(
                            "keyword name `{name}` may not be dotted"
                        )));
                    }

                    if call.kwargs.contains_key(name) {
                        return Err(Error::BadArgumentSyntax(format!(
                            "duplicate keyword argument `{name}`"
                        )));
                    }

                    call.kwargs.insert(name.to_string(), value(token, slice)?);
                    cursor += 3;
                }
                [(ArgToken::Assign, _), ..] => {
                    return Err(Error::BadArgumentSyntax(
                        "`=` must follow a keyword name".to_string(),
                    ));
                }
                [(token, slice), ..] => {
                    if !call.kwargs.is_empty() {
                        return Err(Error::BadArgumentSyntax(format!(
                            "positional argument `{slice}` follows a keyword argument"
                        )));
                    }

                    call.args.push(value(token, slice)?);
                    cursor += 1;
                }
                [] => {
                    return Err(Error::BadArgumentSyntax(
                        "trailing `,` in argument list".to_string(),
                    ));
                }
            }

            match tokens.get(cursor) {
                None => return Ok(call),
                Some((ArgToken::Comma, _)) => cursor += 1,
                Some((_, slice)) => {
                    return Err(Error::BadArgumentSyntax(format!(
                        "expected `,` before `{slice}`"
                    )));
                }
            }
        }
    }
}
