use std::{borrow::Cow, collections::VecDeque, fmt::Display};

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Marks the start of an identifier: `$HP`.
pub const IDENT_SIGIL: char = '$';
/// Opens and closes a quoted string: `@some text@`.
pub const QUOTE: char = '@';
pub const ESCAPE: char = '\\';

#[derive(Error, Debug, Diagnostic)]
pub enum LexError {
    #[error("unterminated quoted string")]
    #[diagnostic(
        code(tunascript::lex::unterminated_string),
        help("close the string with a trailing `@`, or escape the opening one as `\\@`")
    )]
    UnterminatedString {
        #[source_code]
        src: NamedSource<String>,

        #[label("this string is never closed")]
        span: SourceSpan,

        line: usize,
    },
}

impl LexError {
    pub fn line(&self) -> usize {
        match self {
            LexError::UnterminatedString { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'de> {
    pub kind: TokenKind,
    pub literal: Cow<'de, str>,
    pub line: usize,
    pub column: usize,
    /// Byte offset of the first character of the token.
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    QuotedString,
    UnquotedString,
    Number,
    Bool,
    Add,
    Sub,
    Mult,
    Div,
    Not,
    Inc,
    Dec,
    IncBy,
    DecBy,
    Set,
    Is,
    IsNot,
    LessThan,
    LessThanIs,
    GreaterThan,
    GreaterThanIs,
    And,
    Or,
    Separator,
    LeftParen,
    RightParen,
    EndOfText,
}

impl Token<'_> {
    /// Identifier name without the sigil.
    pub fn name(&self) -> &str {
        self.literal.strip_prefix(IDENT_SIGIL).unwrap_or(&self.literal)
    }

    /// Contents of a quoted string with the delimiters removed and escapes resolved.
    pub fn unquote(&self) -> String {
        let inner = self.literal.strip_prefix(QUOTE).unwrap_or(&self.literal);
        let inner = inner.strip_suffix(QUOTE).unwrap_or(inner);
        unescape(inner)
    }
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = &self.literal;
        let (line, col) = (self.line, self.column);
        let name = match self.kind {
            TokenKind::Identifier => "IDENTIFIER",
            TokenKind::QuotedString => "QUOTED_STRING",
            TokenKind::UnquotedString => "UNQUOTED_STRING",
            TokenKind::Number => "NUMBER",
            TokenKind::Bool => "BOOL",
            TokenKind::Add => "ADD",
            TokenKind::Sub => "SUB",
            TokenKind::Mult => "MULT",
            TokenKind::Div => "DIV",
            TokenKind::Not => "NOT",
            TokenKind::Inc => "INC",
            TokenKind::Dec => "DEC",
            TokenKind::IncBy => "INC_BY",
            TokenKind::DecBy => "DEC_BY",
            TokenKind::Set => "SET",
            TokenKind::Is => "IS",
            TokenKind::IsNot => "IS_NOT",
            TokenKind::LessThan => "LESS_THAN",
            TokenKind::LessThanIs => "LESS_THAN_IS",
            TokenKind::GreaterThan => "GREATER_THAN",
            TokenKind::GreaterThanIs => "GREATER_THAN_IS",
            TokenKind::And => "AND",
            TokenKind::Or => "OR",
            TokenKind::Separator => "SEPARATOR",
            TokenKind::LeftParen => "LEFT_PAREN",
            TokenKind::RightParen => "RIGHT_PAREN",
            TokenKind::EndOfText => "EOT",
        };
        write!(f, "{name} {lit} {line}:{col}")
    }
}

/// Whether the text is one of the boolean literal spellings, ignoring case.
pub fn is_bool_literal(text: &str) -> bool {
    matches!(
        text.to_ascii_uppercase().as_str(),
        "TRUE" | "FALSE" | "ON" | "OFF" | "YES" | "NO"
    )
}

/// Whether the text is a decimal integer that fits an `i64`.
pub fn is_number_literal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) && text.parse::<i64>().is_ok()
}

pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Resolves `\x` to `x`. A trailing lone backslash is kept.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            out.push(chars.next().unwrap_or(ESCAPE));
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Default,
    Ident,
    Quoted,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: TokenKind,
    offset: usize,
    end: usize,
    line: usize,
    column: usize,
}

/// Single-pass lexer for the expression dialect.
///
/// Yields tokens lazily and always finishes with one [`TokenKind::EndOfText`]
/// token. The only failure is a quoted string that is still open at the end of
/// the input; operator sequencing is left to the parser.
pub struct Lexer<'de> {
    filename: Option<&'de str>,
    whole: &'de str,
    byte: usize,
    line: usize,
    column: usize,
    mode: Mode,
    escaping: bool,
    buf: String,
    pending: Option<Pending>,
    queue: VecDeque<Token<'de>>,
    done: bool,
}

impl<'de> Lexer<'de> {
    pub fn new(filename: Option<&'de str>, input: &'de str) -> Self {
        Lexer {
            filename,
            whole: input,
            byte: 0,
            line: 1,
            column: 1,
            mode: Mode::Default,
            escaping: false,
            buf: String::new(),
            pending: None,
            queue: VecDeque::new(),
            done: false,
        }
    }

    pub fn source(&self) -> NamedSource<String> {
        NamedSource::new(self.filename.unwrap_or("<input>"), self.whole.to_string())
    }

    fn current(&self) -> Option<char> {
        self.whole[self.byte..].chars().next()
    }

    fn lookahead(&self) -> Option<char> {
        let mut chars = self.whole[self.byte..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) {
        let Some(c) = self.current() else {
            return;
        };
        self.byte += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }

    fn begin(&mut self, kind: TokenKind) {
        self.pending = Some(Pending {
            kind,
            offset: self.byte,
            end: self.byte,
            line: self.line,
            column: self.column,
        });
    }

    /// Appends the current character to the pending token, opening an
    /// unquoted string if nothing is pending yet.
    fn accumulate(&mut self, c: char) {
        if self.pending.is_none() {
            self.begin(TokenKind::UnquotedString);
        }
        self.buf.push(c);
        if let Some(pending) = self.pending.as_mut() {
            pending.end = self.byte + c.len_utf8();
        }
    }

    fn flush(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if self.buf.is_empty() {
            return;
        }

        let mut kind = pending.kind;
        if kind == TokenKind::UnquotedString {
            if is_bool_literal(&self.buf) {
                kind = TokenKind::Bool;
            } else if is_number_literal(&self.buf) {
                kind = TokenKind::Number;
            }
        }

        let whole = self.whole;
        let source = &whole[pending.offset..pending.end];
        let literal = if source == self.buf {
            self.buf.clear();
            Cow::Borrowed(source)
        } else {
            Cow::Owned(std::mem::take(&mut self.buf))
        };

        self.push(Token {
            kind,
            literal,
            line: pending.line,
            column: pending.column,
            offset: pending.offset,
        });
    }

    fn push(&mut self, token: Token<'de>) {
        tracing::trace!(kind = ?token.kind, line = token.line, column = token.column, "token");
        self.queue.push_back(token);
    }

    /// Emits an operator spanning `width` characters starting at the current one.
    fn operator(&mut self, kind: TokenKind, width: usize) {
        self.flush();
        let (offset, line, column) = (self.byte, self.line, self.column);
        for _ in 0..width {
            self.bump();
        }
        let whole = self.whole;
        self.push(Token {
            kind,
            literal: Cow::Borrowed(&whole[offset..self.byte]),
            line,
            column,
            offset,
        });
    }

    fn lex_default(&mut self, c: char) {
        if self.escaping {
            self.escaping = false;
            self.accumulate(c);
            self.bump();
            return;
        }

        match c {
            ESCAPE => {
                self.escaping = true;
                self.bump();
            }
            QUOTE | IDENT_SIGIL => {
                self.flush();
                if c == QUOTE {
                    self.begin(TokenKind::QuotedString);
                    self.mode = Mode::Quoted;
                } else {
                    self.begin(TokenKind::Identifier);
                    self.mode = Mode::Ident;
                }
                self.accumulate(c);
                self.bump();
            }
            ',' => self.operator(TokenKind::Separator, 1),
            '(' => self.operator(TokenKind::LeftParen, 1),
            ')' => self.operator(TokenKind::RightParen, 1),
            '*' => self.operator(TokenKind::Mult, 1),
            '/' => self.operator(TokenKind::Div, 1),
            '+' => match self.lookahead() {
                Some('+') => self.operator(TokenKind::Inc, 2),
                Some('=') => self.operator(TokenKind::IncBy, 2),
                _ => self.operator(TokenKind::Add, 1),
            },
            '-' => match self.lookahead() {
                Some('-') => self.operator(TokenKind::Dec, 2),
                Some('=') => self.operator(TokenKind::DecBy, 2),
                _ => self.operator(TokenKind::Sub, 1),
            },
            '!' => match self.lookahead() {
                Some('=') => self.operator(TokenKind::IsNot, 2),
                _ => self.operator(TokenKind::Not, 1),
            },
            '<' => match self.lookahead() {
                Some('=') => self.operator(TokenKind::LessThanIs, 2),
                _ => self.operator(TokenKind::LessThan, 1),
            },
            '>' => match self.lookahead() {
                Some('=') => self.operator(TokenKind::GreaterThanIs, 2),
                _ => self.operator(TokenKind::GreaterThan, 1),
            },
            '=' => match self.lookahead() {
                Some('=') => self.operator(TokenKind::Is, 2),
                _ => self.operator(TokenKind::Set, 1),
            },
            '&' if self.lookahead() == Some('&') => self.operator(TokenKind::And, 2),
            '|' if self.lookahead() == Some('|') => self.operator(TokenKind::Or, 2),
            c if c.is_whitespace() => self.bump(),
            c => {
                self.accumulate(c);
                self.bump();
            }
        }
    }

    fn lex_ident(&mut self, c: char) {
        if is_ident_char(c) {
            self.accumulate(c);
            self.bump();
        } else {
            // the terminator is not consumed, it gets lexed again in default mode
            self.flush_ident();
            self.mode = Mode::Default;
        }
    }

    fn flush_ident(&mut self) {
        // identifiers are never reclassified as literals, so `$TRUE` stays a flag
        let Some(pending) = self.pending.take() else {
            return;
        };
        let whole = self.whole;
        self.buf.clear();
        self.push(Token {
            kind: TokenKind::Identifier,
            literal: Cow::Borrowed(&whole[pending.offset..pending.end]),
            line: pending.line,
            column: pending.column,
            offset: pending.offset,
        });
    }

    fn lex_quoted(&mut self, c: char) {
        if !self.escaping && c == QUOTE {
            self.accumulate(c);
            self.bump();
            self.flush();
            self.mode = Mode::Default;
        } else if !self.escaping && c == ESCAPE {
            // kept so later passes still see the escape sequence
            self.escaping = true;
            self.accumulate(c);
            self.bump();
        } else {
            self.escaping = false;
            self.accumulate(c);
            self.bump();
        }
    }

    fn finish(&mut self) -> Result<(), LexError> {
        self.done = true;
        match self.mode {
            Mode::Quoted => {
                let start = self.pending.map_or(self.byte, |p| p.offset);
                let line = self.pending.map_or(self.line, |p| p.line);
                return Err(LexError::UnterminatedString {
                    src: self.source(),
                    span: SourceSpan::from(start..self.whole.len()),
                    line,
                });
            }
            Mode::Ident => self.flush_ident(),
            Mode::Default => {
                if self.escaping {
                    // a trailing backslash escapes nothing
                    self.escaping = false;
                    if self.pending.is_none() {
                        self.begin(TokenKind::UnquotedString);
                        if let Some(pending) = self.pending.as_mut() {
                            pending.offset -= ESCAPE.len_utf8();
                            pending.column -= 1;
                        }
                    }
                    self.buf.push(ESCAPE);
                    if let Some(pending) = self.pending.as_mut() {
                        pending.end = self.byte;
                    }
                }
                self.flush();
            }
        }
        self.mode = Mode::Default;
        self.push(Token {
            kind: TokenKind::EndOfText,
            literal: Cow::Borrowed(""),
            line: self.line,
            column: self.column,
            offset: self.byte,
        });
        Ok(())
    }
}

impl<'de> Iterator for Lexer<'de> {
    type Item = Result<Token<'de>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.queue.pop_front() {
                return Some(Ok(token));
            }
            if self.done {
                return None;
            }

            let Some(c) = self.current() else {
                if let Err(e) = self.finish() {
                    return Some(Err(e));
                }
                continue;
            };

            match self.mode {
                Mode::Default => self.lex_default(c),
                Mode::Ident => self.lex_ident(c),
                Mode::Quoted => self.lex_quoted(c),
            }
        }
    }
}

/// Lexes the whole input at once.
pub fn lex(input: &str) -> Result<Vec<Token<'_>>, LexError> {
    Lexer::new(None, input).collect()
}
