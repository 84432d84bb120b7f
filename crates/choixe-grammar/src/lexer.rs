//! Lexing of directive-bearing strings.

use logos::Logos;

use crate::Error;

/// Consumes the argument region of a call directive.
///
/// The lexer has just matched `$name(`; this scans through the matching close
/// parenthesis. The region is flat: a second open parenthesis before the
/// close is rejected, quoted or not.
fn consume_arguments(lexer: &mut logos::Lexer<'_, StringToken>) -> Result<(), Error> {
    let mut len = 0;
    for c in lexer.remainder().chars() {
        match c {
            '(' => return Err(Error::UnsupportedNesting),
            ')' => {
                lexer.bump(len + 1);
                return Ok(());
            }
            _ => len += c.len_utf8(),
        }
    }

    Err(Error::UnterminatedCall)
}

/// Represents a token in a directive-bearing string.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(error = Error)]
enum StringToken {
    /// A call directive (`$name(...)`), argument region included.
    #[regex(r"\$[A-Za-z_][A-Za-z0-9_]*\(", consume_arguments)]
    Call,

    /// A compact directive (`$name`).
    #[regex(r"\$[A-Za-z_][A-Za-z0-9_]*")]
    Compact,

    /// A span of literal text.
    #[regex(r"[^$]+")]
    Text,

    /// A dollar sign that is part of the literal text.
    #[token("$")]
    Dollar,
}

/// A lexed region of a directive-bearing string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Literal text between directives.
    Plain(&'a str),

    /// A single directive occurrence.
    Directive {
        /// The directive name, without the leading `$`.
        name: &'a str,
        /// The raw text between the parentheses of a call form.
        ///
        /// This is `None` for the compact form.
        args: Option<&'a str>,
    },
}

/// Tokenizes a directive-bearing string.
///
/// Consecutive runs of literal text (including `$` signs that do not start a
/// directive) collapse into a single [`Token::Plain`]. A string without
/// directives yields at most one token.
pub fn tokenize(source: &str) -> Result<Vec<Token<'_>>, Error> {
    let mut lexer = StringToken::lexer(source);
    let mut tokens = Vec::new();
    let mut plain: Option<std::ops::Range<usize>> = None;

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result? {
            StringToken::Text | StringToken::Dollar => {
                plain = Some(match plain {
                    Some(run) => run.start..span.end,
                    None => span,
                });
            }
            token @ (StringToken::Call | StringToken::Compact) => {
                if let Some(run) = plain.take() {
                    tokens.push(Token::Plain(&source[run]));
                }

                let slice = lexer.slice();
                tokens.push(match token {
                    StringToken::Call => {
                        let open = slice
                            .find('(')
                            .expect("a call token should contain an open parenthesis");
                        Token::Directive {
                            name: &slice[1..open],
                            args: Some(&slice[open + 1..slice.len() - 1]),
                        }
                    }
                    _ => Token::Directive {
                        name: &slice[1..],
                        args: None,
                    },
                });
            }
        }
    }

    if let Some(run) = plain {
        tokens.push(Token::Plain(&source[run]));
    }

    Ok(tokens)
}
