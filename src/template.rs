//! Conditional text: `$[[IF expr]] ... $[[ELSEIF expr]] ... $[[ELSE]] ...
//! $[[ENDIF]]`, nestable, with conditions in the expression dialect.

use miette::{NamedSource, SourceSpan};

use crate::{Error, eval::Interpreter, lex::ESCAPE, parse::ParseError};

const OPEN: &str = "$[[";
const CLOSE: &str = "]]";

/// A piece of the template source and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub offset: usize,
}

impl Fragment {
    /// How diagnostics refer to this fragment: the template's name and the
    /// byte range the fragment covers, e.g. `room.txt[12..30]`.
    fn name(&self, template: Option<&str>) -> String {
        let end = self.offset + self.text.len();
        format!("{}[{}..{end}]", template.unwrap_or("<input>"), self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// Text-dialect source, interpolated when rendered.
    Text(Fragment),
    /// An IF chain. The first branch whose condition holds is rendered; a
    /// branch without a condition is the ELSE.
    Branches(Vec<Branch>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub condition: Option<Fragment>,
    pub body: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    pub name: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Directive {
    If(Fragment),
    ElseIf(Fragment),
    Else,
    EndIf,
}

impl Directive {
    fn name(&self) -> &'static str {
        match self {
            Directive::If(_) => "IF",
            Directive::ElseIf(_) => "ELSEIF",
            Directive::Else => "ELSE",
            Directive::EndIf => "ENDIF",
        }
    }
}

#[derive(Debug)]
enum Segment<'de> {
    Text(&'de str, usize),
    Directive(Directive, SourceSpan),
}

fn split_word(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(at) => (&text[..at], text[at..].trim()),
        None => (text, &text[text.len()..]),
    }
}

/// `part` must be a subslice of `whole`.
fn fragment(whole: &str, part: &str) -> Fragment {
    Fragment {
        text: part.to_string(),
        offset: part.as_ptr() as usize - whole.as_ptr() as usize,
    }
}

struct TemplateParser<'de> {
    filename: Option<&'de str>,
    whole: &'de str,
    segments: std::vec::IntoIter<Segment<'de>>,
    max_depth: usize,
    depth: usize,
}

impl<'de> TemplateParser<'de> {
    fn source(&self) -> NamedSource<String> {
        NamedSource::new(self.filename.unwrap_or("<input>"), self.whole.to_string())
    }

    fn unexpected(&self, directive: &str, span: SourceSpan) -> ParseError {
        ParseError::UnexpectedDirective {
            src: self.source(),
            span,
            directive: directive.to_string(),
        }
    }

    fn directive(&self, body: &str, span: SourceSpan) -> Result<Directive, ParseError> {
        let (head, rest) = split_word(body.trim());
        let directive = match head.to_ascii_uppercase().as_str() {
            "IF" => Directive::If(fragment(self.whole, rest)),
            "ELSEIF" | "ELIF" => Directive::ElseIf(fragment(self.whole, rest)),
            "ELSE" if rest.is_empty() => Directive::Else,
            "ELSE" => match split_word(rest) {
                (word, condition) if word.eq_ignore_ascii_case("IF") => {
                    Directive::ElseIf(fragment(self.whole, condition))
                }
                _ => return Err(self.unexpected(body.trim(), span)),
            },
            "ENDIF" if rest.is_empty() => Directive::EndIf,
            "END" if rest.eq_ignore_ascii_case("IF") => Directive::EndIf,
            _ => return Err(self.unexpected(body.trim(), span)),
        };
        if let Directive::If(condition) | Directive::ElseIf(condition) = &directive {
            if condition.text.is_empty() {
                return Err(self.unexpected(directive.name(), span));
            }
        }
        Ok(directive)
    }

    /// Splits the input into text and directives. A `\` before `$[[` keeps
    /// it as text.
    fn scan(&self) -> Result<Vec<Segment<'de>>, ParseError> {
        let whole = self.whole;
        let mut segments = Vec::new();
        let mut text_start = 0;
        let mut pos = 0;
        let mut escaping = false;

        while let Some(c) = whole[pos..].chars().next() {
            if escaping {
                escaping = false;
                pos += c.len_utf8();
                continue;
            }
            if c == ESCAPE {
                escaping = true;
                pos += c.len_utf8();
                continue;
            }
            if !whole[pos..].starts_with(OPEN) {
                pos += c.len_utf8();
                continue;
            }

            let body_start = pos + OPEN.len();
            let Some(body_len) = find_close(&whole[body_start..]) else {
                return Err(ParseError::UnterminatedDirective {
                    src: self.source(),
                    span: SourceSpan::from(pos..whole.len()),
                });
            };
            if text_start < pos {
                segments.push(Segment::Text(&whole[text_start..pos], text_start));
            }
            let end = body_start + body_len + CLOSE.len();
            let span = SourceSpan::from(pos..end);
            let directive = self.directive(&whole[body_start..body_start + body_len], span)?;
            segments.push(Segment::Directive(directive, span));
            pos = end;
            text_start = end;
        }
        if text_start < whole.len() {
            segments.push(Segment::Text(&whole[text_start..], text_start));
        }
        Ok(segments)
    }

    /// Parses parts until the input ends or (when `nested`) a directive that
    /// continues or closes the enclosing IF.
    fn parts(&mut self, nested: bool) -> Result<(Vec<Part>, Option<(Directive, SourceSpan)>), ParseError> {
        let mut parts = Vec::new();
        while let Some(segment) = self.segments.next() {
            match segment {
                Segment::Text(text, offset) => parts.push(Part::Text(Fragment {
                    text: text.to_string(),
                    offset,
                })),
                Segment::Directive(Directive::If(condition), open) => {
                    if self.depth >= self.max_depth {
                        return Err(ParseError::TooDeep {
                            src: self.source(),
                            span: open,
                            limit: self.max_depth,
                        });
                    }
                    self.depth += 1;
                    let branches = self.branches(condition, open);
                    self.depth -= 1;
                    parts.push(branches?);
                }
                Segment::Directive(directive, span) => {
                    if nested {
                        return Ok((parts, Some((directive, span))));
                    }
                    return Err(self.unexpected(directive.name(), span));
                }
            }
        }
        Ok((parts, None))
    }

    fn branches(&mut self, condition: Fragment, open: SourceSpan) -> Result<Part, ParseError> {
        let mut branches = Vec::new();
        let mut condition = Some(condition);
        let mut after_else = false;
        loop {
            let (body, end) = self.parts(true)?;
            match end {
                None => {
                    return Err(ParseError::UnclosedIf {
                        src: self.source(),
                        span: open,
                    });
                }
                Some((Directive::EndIf, _)) => {
                    branches.push(Branch { condition, body });
                    return Ok(Part::Branches(branches));
                }
                Some((directive, span)) if after_else => {
                    return Err(self.unexpected(directive.name(), span));
                }
                Some((Directive::ElseIf(next), _)) => {
                    branches.push(Branch { condition, body });
                    condition = Some(next);
                }
                Some((Directive::Else, _)) => {
                    branches.push(Branch { condition, body });
                    condition = None;
                    after_else = true;
                }
                // `parts` handles IF itself and never returns it
                Some((Directive::If(_), span)) => return Err(self.unexpected("IF", span)),
            }
        }
    }
}

/// Byte length up to the first unescaped `]]`.
fn find_close(text: &str) -> Option<usize> {
    let mut escaping = false;
    for (at, c) in text.char_indices() {
        if escaping {
            escaping = false;
        } else if c == ESCAPE {
            escaping = true;
        } else if text[at..].starts_with(CLOSE) {
            return Some(at);
        }
    }
    None
}

impl Template {
    /// Parses `source`, allowing IF blocks nested up to `max_depth` deep.
    pub fn parse(filename: Option<&str>, source: &str, max_depth: usize) -> Result<Template, ParseError> {
        let mut parser = TemplateParser {
            filename,
            whole: source,
            segments: Vec::new().into_iter(),
            max_depth,
            depth: 0,
        };
        parser.segments = parser.scan()?.into_iter();
        let (parts, _) = parser.parts(false)?;
        Ok(Template {
            name: filename.map(str::to_string),
            parts,
        })
    }

    /// Diagnostics from a fragment are labelled with the fragment's range in
    /// the template, and their spans count from the fragment's start.
    pub fn render(&self, interp: &mut Interpreter<'_>) -> Result<String, Error> {
        let mut out = String::new();
        self.render_parts(&self.parts, interp, &mut out)?;
        Ok(out)
    }

    fn render_parts(&self, parts: &[Part], interp: &mut Interpreter<'_>, out: &mut String) -> Result<(), Error> {
        let name = self.name.as_deref();
        for part in parts {
            match part {
                Part::Text(text) => {
                    out.push_str(&interp.interpolate_named(Some(&text.name(name)), &text.text)?)
                }
                Part::Branches(branches) => {
                    for branch in branches {
                        let taken = match &branch.condition {
                            Some(condition) => interp
                                .eval_expr_named(Some(&condition.name(name)), &condition.text)?
                                .truthy(),
                            None => true,
                        };
                        if taken {
                            self.render_parts(&branch.body, interp, out)?;
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{value::Value, world::MemoryWorld};

    fn expand(source: &str, setup: &[(&str, Value)]) -> Result<String, Error> {
        let mut world = MemoryWorld::new();
        let mut interp = Interpreter::new(&mut world).unwrap();
        for (name, value) in setup {
            interp.flags_mut().set(name, value.clone());
        }
        interp.expand(source)
    }

    #[test]
    fn chooses_one_branch() {
        let source = "A$[[IF $HP > 5]]strong$[[ELSE IF $HP > 0]]weak$[[ELSE]]dead$[[END IF]]Z";
        assert_eq!(expand(source, &[("HP", Value::Number(9))]).unwrap(), "AstrongZ");
        assert_eq!(expand(source, &[("HP", Value::Number(2))]).unwrap(), "AweakZ");
        assert_eq!(expand(source, &[]).unwrap(), "AdeadZ");
    }

    #[test]
    fn nested_blocks_and_interpolation() {
        let source = "$[[if $LAMP]]Lit.$[[IF $GOLD >= 3]] Rich: $GOLD gold.$[[ENDIF]]$[[ENDIF]]";
        assert_eq!(
            expand(source, &[("LAMP", Value::Bool(true)), ("GOLD", Value::Number(4))]).unwrap(),
            "Lit. Rich: 4 gold."
        );
        assert_eq!(expand(source, &[("GOLD", Value::Number(4))]).unwrap(), "");
    }

    #[test]
    fn untaken_branches_have_no_effects() {
        let mut world = MemoryWorld::new();
        let mut interp = Interpreter::new(&mut world).unwrap();
        let out = interp
            .expand("$[[IF FALSE]]$INC($SEEN)$[[ELIF TRUE]]ok$[[ENDIF]]")
            .unwrap();
        assert_eq!(out, "ok");
        assert!(!interp.flags().contains("SEEN"));
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = "$[[IF TRUE]]".repeat(10) + &"$[[ENDIF]]".repeat(10);
        assert!(Template::parse(None, &deep, 10).is_ok());
        assert!(matches!(
            Template::parse(None, &deep, 9),
            Err(ParseError::TooDeep { limit: 9, .. })
        ));
    }

    #[test]
    fn fragment_errors_name_their_range() {
        let mut world = MemoryWorld::new();
        let mut interp = Interpreter::new(&mut world).unwrap();
        let source = "Hi.$[[IF ($A]]x$[[ENDIF]]";
        match interp.expand_named(Some("room.txt"), source) {
            Err(Error::Parse(ParseError::UnmatchedLeftParen { src, span })) => {
                assert_eq!(src.name(), "room.txt[9..12]");
                assert_eq!(span.offset(), 0);
            }
            other => panic!("expected an unmatched paren, got {other:?}"),
        }
        match interp.expand("ok $OUTPUT(") {
            Err(Error::Parse(ParseError::UnmatchedLeftParen { src, .. })) => {
                assert_eq!(src.name(), "<input>[0..11]");
            }
            other => panic!("expected an unmatched paren, got {other:?}"),
        }
        // directive errors point into the whole template
        match interp.expand_named(Some("room.txt"), "x$[[ENDIF]]") {
            Err(Error::Parse(ParseError::UnexpectedDirective { src, span, .. })) => {
                assert_eq!(src.name(), "room.txt");
                assert_eq!(span.offset(), 1);
            }
            other => panic!("expected an unexpected directive, got {other:?}"),
        }
    }

    #[test]
    fn escaped_directive_is_text() {
        assert_eq!(expand("\\$[[IF x]]", &[]).unwrap(), "$[[IF x]]");
    }

    #[test]
    fn malformed_blocks() {
        assert!(matches!(
            Template::parse(None, "$[[IF $A]]x", 64),
            Err(ParseError::UnclosedIf { .. })
        ));
        assert!(matches!(
            Template::parse(None, "x$[[ENDIF]]", 64),
            Err(ParseError::UnexpectedDirective { .. })
        ));
        assert!(matches!(
            Template::parse(None, "$[[IF $A]]$[[ELSE]]$[[ELSE]]$[[ENDIF]]", 64),
            Err(ParseError::UnexpectedDirective { .. })
        ));
        assert!(matches!(
            Template::parse(None, "$[[IF $A", 64),
            Err(ParseError::UnterminatedDirective { .. })
        ));
        assert!(matches!(
            Template::parse(None, "$[[WHILE $A]]", 64),
            Err(ParseError::UnexpectedDirective { .. })
        ));
        assert!(matches!(
            Template::parse(None, "$[[IF]]$[[ENDIF]]", 64),
            Err(ParseError::UnexpectedDirective { .. })
        ));
    }
}
