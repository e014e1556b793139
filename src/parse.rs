use std::{fmt::Display, iter::Peekable};

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::{
    Lexer,
    lex::{LexError, Token, TokenKind},
    value::Value,
};

#[derive(Error, Debug, Diagnostic)]
pub enum ParseError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error("unmatched `(`")]
    #[diagnostic(
        code(tunascript::parse::unmatched_left_paren),
        help("add a closing `)`, or escape this one as `\\(`")
    )]
    UnmatchedLeftParen {
        #[source_code]
        src: NamedSource<String>,

        #[label("this parenthesis is never closed")]
        span: SourceSpan,
    },

    #[error("unmatched `)`")]
    #[diagnostic(
        code(tunascript::parse::unmatched_right_paren),
        help("remove it, or escape it as `\\)`")
    )]
    UnmatchedRightParen {
        #[source_code]
        src: NamedSource<String>,

        #[label("nothing opened this parenthesis")]
        span: SourceSpan,
    },

    #[error("unterminated `|` literal")]
    #[diagnostic(code(tunascript::parse::unterminated_quote), help("close it with another `|`"))]
    UnterminatedQuote {
        #[source_code]
        src: NamedSource<String>,

        #[label("literal starts here")]
        span: SourceSpan,
    },

    #[error("nesting deeper than {limit} levels")]
    #[diagnostic(code(tunascript::parse::too_deep))]
    TooDeep {
        #[source_code]
        src: NamedSource<String>,

        #[label("limit reached here")]
        span: SourceSpan,

        limit: usize,
    },

    #[error("unexpected `{found}`, expected {expected}")]
    #[diagnostic(code(tunascript::parse::unexpected_token))]
    UnexpectedToken {
        #[source_code]
        src: NamedSource<String>,

        #[label("here")]
        span: SourceSpan,

        found: String,
        expected: &'static str,
    },

    #[error("unexpected end of text, expected {expected}")]
    #[diagnostic(code(tunascript::parse::unexpected_end))]
    UnexpectedEnd {
        #[source_code]
        src: NamedSource<String>,

        #[label("text ends here")]
        span: SourceSpan,

        expected: &'static str,
    },

    #[error("unterminated `$[[` directive")]
    #[diagnostic(code(tunascript::template::unterminated_directive), help("close it with `]]`"))]
    UnterminatedDirective {
        #[source_code]
        src: NamedSource<String>,

        #[label("directive starts here")]
        span: SourceSpan,
    },

    #[error("unexpected `{directive}` directive")]
    #[diagnostic(code(tunascript::template::unexpected_directive))]
    UnexpectedDirective {
        #[source_code]
        src: NamedSource<String>,

        #[label("not inside a matching IF block")]
        span: SourceSpan,

        directive: String,
    },

    #[error("IF block is never closed")]
    #[diagnostic(code(tunascript::template::unclosed_if), help("add `$[[ENDIF]]`"))]
    UnclosedIf {
        #[source_code]
        src: NamedSource<String>,

        #[label("block opened here")]
        span: SourceSpan,
    },
}

/// Evaluable form shared by both dialects.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenTree {
    Atom(Atom),
    Call { name: String, args: Vec<TokenTree> },
    /// Fragments whose rendered values are joined into one string.
    Concat(Vec<TokenTree>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Literal(Value),
    Flag(String),
}

impl TokenTree {
    pub fn call(name: &str, args: Vec<TokenTree>) -> Self {
        TokenTree::Call {
            name: name.to_ascii_uppercase(),
            args,
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        TokenTree::Atom(Atom::Literal(value.into()))
    }

    pub fn flag(name: &str) -> Self {
        TokenTree::Atom(Atom::Flag(name.to_ascii_uppercase()))
    }
}

impl Display for TokenTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenTree::Atom(Atom::Literal(Value::Str(s))) => write!(f, "{s:?}"),
            TokenTree::Atom(Atom::Literal(v)) => write!(f, "{v}"),
            TokenTree::Atom(Atom::Flag(name)) => write!(f, "${name}"),
            TokenTree::Call { name, args } => {
                write!(f, "({name}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            TokenTree::Concat(parts) => {
                write!(f, "(CONCAT")?;
                for part in parts {
                    write!(f, " {part}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Infix {
    Add,
    Sub,
    Mult,
    Div,
    And,
    Or,
    Is,
    IsNot,
    LessThan,
    LessThanIs,
    GreaterThan,
    GreaterThanIs,
    Set,
    IncBy,
    DecBy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefix {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Postfix {
    Inc,
    Dec,
}

fn prefix_binding_power(kind: TokenKind) -> Option<(Prefix, u8)> {
    match kind {
        TokenKind::Not => Some((Prefix::Not, 15)),
        TokenKind::Sub => Some((Prefix::Negate, 15)),
        _ => None,
    }
}

fn postfix_binding_power(kind: TokenKind) -> Option<(Postfix, u8)> {
    match kind {
        TokenKind::Inc => Some((Postfix::Inc, 17)),
        TokenKind::Dec => Some((Postfix::Dec, 17)),
        _ => None,
    }
}

fn infix_binding_power(kind: TokenKind) -> Option<(Infix, u8, u8)> {
    let op = match kind {
        TokenKind::Set => (Infix::Set, 2, 1),
        TokenKind::IncBy => (Infix::IncBy, 2, 1),
        TokenKind::DecBy => (Infix::DecBy, 2, 1),
        TokenKind::Or => (Infix::Or, 3, 4),
        TokenKind::And => (Infix::And, 5, 6),
        TokenKind::Is => (Infix::Is, 7, 8),
        TokenKind::IsNot => (Infix::IsNot, 7, 8),
        TokenKind::LessThan => (Infix::LessThan, 9, 10),
        TokenKind::LessThanIs => (Infix::LessThanIs, 9, 10),
        TokenKind::GreaterThan => (Infix::GreaterThan, 9, 10),
        TokenKind::GreaterThanIs => (Infix::GreaterThanIs, 9, 10),
        TokenKind::Add => (Infix::Add, 11, 12),
        TokenKind::Sub => (Infix::Sub, 11, 12),
        TokenKind::Mult => (Infix::Mult, 13, 14),
        TokenKind::Div => (Infix::Div, 13, 14),
        _ => return None,
    };
    Some(op)
}

fn desugar(op: Infix, lhs: TokenTree, rhs: TokenTree) -> TokenTree {
    let not = |tree: TokenTree| TokenTree::call("NOT", vec![tree]);
    match op {
        Infix::Add => TokenTree::call("ADD", vec![lhs, rhs]),
        Infix::Sub => TokenTree::call("SUB", vec![lhs, rhs]),
        Infix::Mult => TokenTree::call("MULT", vec![lhs, rhs]),
        Infix::Div => TokenTree::call("DIV", vec![lhs, rhs]),
        Infix::And => TokenTree::call("AND", vec![lhs, rhs]),
        Infix::Or => TokenTree::call("OR", vec![lhs, rhs]),
        Infix::Is => TokenTree::call("FLAG_IS", vec![lhs, rhs]),
        Infix::IsNot => not(TokenTree::call("FLAG_IS", vec![lhs, rhs])),
        Infix::LessThan => TokenTree::call("FLAG_LESS_THAN", vec![lhs, rhs]),
        Infix::LessThanIs => not(TokenTree::call("FLAG_GREATER_THAN", vec![lhs, rhs])),
        Infix::GreaterThan => TokenTree::call("FLAG_GREATER_THAN", vec![lhs, rhs]),
        Infix::GreaterThanIs => not(TokenTree::call("FLAG_LESS_THAN", vec![lhs, rhs])),
        Infix::Set => TokenTree::call("SET", vec![lhs, rhs]),
        Infix::IncBy => TokenTree::call("INC", vec![lhs, rhs]),
        Infix::DecBy => TokenTree::call("DEC", vec![lhs, rhs]),
    }
}

/// Binding-power parser for the expression dialect.
pub struct Parser<'de> {
    filename: Option<&'de str>,
    whole: &'de str,
    lexer: Peekable<Lexer<'de>>,
    max_depth: usize,
    depth: usize,
    open_parens: usize,
}

impl<'de> Parser<'de> {
    pub fn new(filename: Option<&'de str>, whole: &'de str, max_depth: usize) -> Self {
        Parser {
            filename,
            whole,
            lexer: Lexer::new(filename, whole).peekable(),
            max_depth,
            depth: 0,
            open_parens: 0,
        }
    }

    fn source(&self) -> NamedSource<String> {
        NamedSource::new(self.filename.unwrap_or("<input>"), self.whole.to_string())
    }

    fn span(token: &Token<'_>) -> SourceSpan {
        SourceSpan::from((token.offset, token.literal.len()))
    }

    fn next_token(&mut self) -> Result<Token<'de>, ParseError> {
        match self.lexer.next() {
            Some(Ok(token)) => Ok(token),
            Some(Err(e)) => Err(e.into()),
            None => Ok(Token {
                kind: TokenKind::EndOfText,
                literal: "".into(),
                line: 0,
                column: 0,
                offset: self.whole.len(),
            }),
        }
    }

    fn peek_kind(&mut self) -> Result<TokenKind, ParseError> {
        match self.lexer.peek() {
            Some(Ok(token)) => return Ok(token.kind),
            None => return Ok(TokenKind::EndOfText),
            Some(Err(_)) => {}
        }
        self.next_token().map(|token| token.kind)
    }

    fn unexpected(&self, token: &Token<'_>, expected: &'static str) -> ParseError {
        match token.kind {
            TokenKind::EndOfText => ParseError::UnexpectedEnd {
                src: self.source(),
                span: Self::span(token),
                expected,
            },
            TokenKind::RightParen if self.open_parens == 0 => ParseError::UnmatchedRightParen {
                src: self.source(),
                span: Self::span(token),
            },
            _ => ParseError::UnexpectedToken {
                src: self.source(),
                span: Self::span(token),
                found: token.literal.to_string(),
                expected,
            },
        }
    }

    /// Parses one complete expression; trailing tokens are an error.
    pub fn parse_expression(mut self) -> Result<TokenTree, ParseError> {
        let tree = self.parse_within(0)?;
        let token = self.next_token()?;
        match token.kind {
            TokenKind::EndOfText => Ok(tree),
            _ => Err(self.unexpected(&token, "an operator or the end of the text")),
        }
    }

    /// Counts one more level of tree above whatever is parsed next.
    fn descend(&mut self) -> Result<(), ParseError> {
        if self.depth >= self.max_depth {
            let offset = match self.lexer.peek() {
                Some(Ok(token)) => token.offset,
                _ => self.whole.len(),
            };
            return Err(ParseError::TooDeep {
                src: self.source(),
                span: SourceSpan::from((offset, 0)),
                limit: self.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    pub fn parse_within(&mut self, min_bp: u8) -> Result<TokenTree, ParseError> {
        self.descend()?;
        let result = self.parse_operand_and_operators(min_bp);
        self.depth -= 1;
        result
    }

    fn parse_operand_and_operators(&mut self, min_bp: u8) -> Result<TokenTree, ParseError> {
        let token = self.next_token()?;

        let lhs = match token.kind {
            TokenKind::Identifier => {
                if token.name().is_empty() {
                    return Err(self.unexpected(&token, "a flag name after `$`"));
                }
                if self.peek_kind()? == TokenKind::LeftParen {
                    self.parse_call(token.name())?
                } else {
                    TokenTree::flag(token.name())
                }
            }
            TokenKind::UnquotedString => {
                if self.peek_kind()? == TokenKind::LeftParen {
                    self.parse_call(&token.literal)?
                } else {
                    TokenTree::literal(Value::from_literal(&token.literal))
                }
            }
            TokenKind::Number | TokenKind::Bool => {
                TokenTree::literal(Value::from_literal(&token.literal))
            }
            TokenKind::QuotedString => TokenTree::literal(token.unquote()),
            TokenKind::LeftParen => {
                self.open_parens += 1;
                let inner = self.parse_within(0)?;
                self.open_parens -= 1;
                let close = self.next_token()?;
                match close.kind {
                    TokenKind::RightParen => inner,
                    TokenKind::EndOfText => {
                        return Err(ParseError::UnmatchedLeftParen {
                            src: self.source(),
                            span: Self::span(&token),
                        });
                    }
                    _ => return Err(self.unexpected(&close, "`)`")),
                }
            }
            kind => match prefix_binding_power(kind) {
                Some((op, r_bp)) => {
                    let rhs = self.parse_within(r_bp)?;
                    match op {
                        Prefix::Not => TokenTree::call("NOT", vec![rhs]),
                        Prefix::Negate => TokenTree::call("SUB", vec![TokenTree::literal(Value::Number(0)), rhs]),
                    }
                }
                None => return Err(self.unexpected(&token, "an expression")),
            },
        };

        // every operator below wraps `lhs` in one more call, so a long chain
        // deepens the tree as much as nesting does
        let entered = self.depth;
        let result = self.parse_operators(lhs, min_bp);
        self.depth = entered;
        result
    }

    fn parse_operators(&mut self, mut lhs: TokenTree, min_bp: u8) -> Result<TokenTree, ParseError> {
        loop {
            let kind = self.peek_kind()?;

            if let Some((op, l_bp)) = postfix_binding_power(kind) {
                if l_bp < min_bp {
                    break;
                }
                self.descend()?;
                self.next_token()?;
                lhs = match op {
                    Postfix::Inc => TokenTree::call("INC", vec![lhs]),
                    Postfix::Dec => TokenTree::call("DEC", vec![lhs]),
                };
                continue;
            }

            if let Some((op, l_bp, r_bp)) = infix_binding_power(kind) {
                if l_bp < min_bp {
                    break;
                }
                self.descend()?;
                self.next_token()?;
                let rhs = self.parse_within(r_bp)?;
                lhs = desugar(op, lhs, rhs);
                continue;
            }

            break;
        }

        Ok(lhs)
    }

    fn parse_call(&mut self, name: &str) -> Result<TokenTree, ParseError> {
        let open = self.next_token()?;
        let mut args = Vec::new();

        if self.peek_kind()? == TokenKind::RightParen {
            self.next_token()?;
            return Ok(TokenTree::call(name, args));
        }

        loop {
            self.open_parens += 1;
            let arg = self.parse_within(0);
            self.open_parens -= 1;
            args.push(arg?);
            let token = self.next_token()?;
            match token.kind {
                TokenKind::Separator => continue,
                TokenKind::RightParen => break,
                TokenKind::EndOfText => {
                    return Err(ParseError::UnmatchedLeftParen {
                        src: self.source(),
                        span: Self::span(&open),
                    });
                }
                _ => return Err(self.unexpected(&token, "`,` or `)`")),
            }
        }

        Ok(TokenTree::call(name, args))
    }
}

/// Parses a single expression-dialect expression.
pub fn parse_expr(input: &str, max_depth: usize) -> Result<TokenTree, ParseError> {
    Parser::new(None, input, max_depth).parse_expression()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(input: &str) -> String {
        parse_expr(input, 64).expect("parses").to_string()
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(parsed("$HP + 3 * 2"), "(ADD $HP (MULT 3 2))");
        assert_eq!(parsed("($HP + 3) * 2"), "(MULT (ADD $HP 3) 2)");
        assert_eq!(parsed("10 - 2 - 3"), "(SUB (SUB 10 2) 3)");
    }

    #[test]
    fn comparisons_desugar_to_flag_functions() {
        assert_eq!(parsed("$HP >= 5"), "(NOT (FLAG_LESS_THAN $HP 5))");
        assert_eq!(parsed("$HP != 5"), "(NOT (FLAG_IS $HP 5))");
        assert_eq!(
            parsed("$A == 1 && !$B || $C < 2"),
            "(OR (AND (FLAG_IS $A 1) (NOT $B)) (FLAG_LESS_THAN $C 2))"
        );
    }

    #[test]
    fn assignment_is_right_associative() {
        assert_eq!(parsed("$A = $B = 3"), "(SET $A (SET $B 3))");
        assert_eq!(parsed("$HP += 5"), "(INC $HP 5)");
        assert_eq!(parsed("$HP--"), "(DEC $HP)");
        assert_eq!(parsed("-$HP"), "(SUB 0 $HP)");
    }

    #[test]
    fn calls() {
        assert_eq!(parsed("$SET($HP, 10)"), "(SET $HP 10)");
        assert_eq!(parsed("output(@hi there@)"), "(OUTPUT \"hi there\")");
        assert_eq!(parsed("NOT()"), "(NOT)");
    }

    #[test]
    fn paren_errors() {
        assert!(matches!(
            parse_expr("($HP + 1", 64),
            Err(ParseError::UnmatchedLeftParen { .. })
        ));
        assert!(matches!(
            parse_expr("$HP + 1)", 64),
            Err(ParseError::UnmatchedRightParen { .. })
        ));
        assert!(matches!(
            parse_expr("ADD(1, 2", 64),
            Err(ParseError::UnmatchedLeftParen { .. })
        ));
    }

    #[test]
    fn dangling_operator() {
        assert!(matches!(
            parse_expr("$HP +", 64),
            Err(ParseError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            parse_expr("* 2", 64),
            Err(ParseError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn lex_errors_pass_through() {
        assert!(matches!(
            parse_expr("@open", 64),
            Err(ParseError::Lex(LexError::UnterminatedString { .. }))
        ));
    }

    #[test]
    fn empty_group_is_not_an_expression() {
        assert!(matches!(
            parse_expr("()", 64),
            Err(ParseError::UnexpectedToken { ref found, expected: "an expression", .. }) if found == ")"
        ));
        assert!(matches!(
            parse_expr("ADD(1, )", 64),
            Err(ParseError::UnexpectedToken { expected: "an expression", .. })
        ));
        assert!(matches!(
            parse_expr("(1))", 64),
            Err(ParseError::UnmatchedRightParen { .. })
        ));
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        let sum = format!("1{}", "+1".repeat(5_000));
        assert!(matches!(
            parse_expr(&sum, 64),
            Err(ParseError::TooDeep { limit: 64, .. })
        ));
        let bumps = format!("$HP{}", "++".repeat(5_000));
        assert!(matches!(
            parse_expr(&bumps, 64),
            Err(ParseError::TooDeep { limit: 64, .. })
        ));
        assert!(parse_expr(&format!("1{}", "+1".repeat(20)), 64).is_ok());
    }

    #[test]
    fn depth_is_bounded() {
        let deep = "(".repeat(100) + "1" + &")".repeat(100);
        assert!(matches!(
            parse_expr(&deep, 32),
            Err(ParseError::TooDeep { limit: 32, .. })
        ));
    }
}
