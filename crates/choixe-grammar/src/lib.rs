//! Lexing and parsing of directives in Choixe configuration templates.
//!
//! A directive is a `$`-prefixed form embedded in an otherwise plain string,
//! such as `$var(params.lr, default=0.1)` or the compact `$index`. This crate
//! recognizes directives inside strings ([`tokenize`]) and parses their
//! argument lists into structured calls ([`DirectiveCall`]). What the
//! directives *mean* is the concern of the `choixe-ast` and `choixe-engine`
//! crates.

mod lexer;
mod parser;

pub use lexer::*;
pub use parser::*;

/// Represents an error produced while lexing or parsing directives.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An open parenthesis was encountered inside a directive argument list.
    ///
    /// Directive arguments are a single flat region; calls do not nest.
    #[error("directive arguments may not contain a nested `(`")]
    UnsupportedNesting,

    /// A call directive was missing its closing parenthesis.
    #[error("directive arguments are missing a closing `)`")]
    UnterminatedCall,

    /// An identifier was malformed.
    #[error("`{0}` is not a valid dotted identifier")]
    BadIdentifier(String),

    /// A directive argument list could not be parsed.
    #[error("invalid directive arguments: {0}")]
    BadArgumentSyntax(String),
}

impl Default for Error {
    fn default() -> Self {
        Self::BadArgumentSyntax("unexpected character".to_string())
    }
}

/// Checks whether a string is a dotted identifier.
///
/// A dotted identifier is one or more `.`-separated names, each starting with
/// an ASCII letter or underscore and continuing with ASCII alphanumerics or
/// underscores.
pub fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
