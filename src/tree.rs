//! Text dialect: literal text with `$NAME` references, `$NAME(args)` calls,
//! `|verbatim|` literals and nested parentheses, built into an arena tree.

use std::fmt::Display;

use miette::{NamedSource, SourceSpan};

use crate::{
    lex::{ESCAPE, IDENT_SIGIL, is_ident_char},
    parse::{ParseError, TokenTree},
    value::{Value, ValueType},
};

pub const PIPE: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// The contents of one nesting level; the root is a group.
    Group,
    LeftParen,
    RightParen,
    Value,
    Identifier,
    Separator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub text: String,
    /// Set for `|...|` literals, which are never reclassified.
    pub forced: Option<ValueType>,
    /// Byte offset in the source.
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub symbol: Symbol,
    pub children: Vec<NodeId>,
}

/// Nodes live in one arena; index 0 is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn add(&mut self, kind: SymbolKind, text: String, forced: Option<ValueType>, offset: usize) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            symbol: Symbol {
                kind,
                text,
                forced,
                offset,
            },
            children: Vec::new(),
        });
        id
    }

    fn append(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.push(child);
    }

    /// Deepest nesting of parenthesis symbols.
    pub fn paren_depth(&self) -> usize {
        self.depth_of(self.root())
    }

    fn depth_of(&self, id: NodeId) -> usize {
        let node = self.node(id);
        let inner = node
            .children
            .iter()
            .filter(|child| self.node(**child).symbol.kind == SymbolKind::Group)
            .map(|child| 1 + self.depth_of(*child))
            .max();
        inner.unwrap_or(0)
    }

    fn write_node(&self, f: &mut std::fmt::Formatter<'_>, id: NodeId, indent: usize) -> std::fmt::Result {
        let node = self.node(id);
        let pad = "  ".repeat(indent);
        match node.symbol.kind {
            SymbolKind::Group => writeln!(f, "{pad}GROUP")?,
            SymbolKind::LeftParen => writeln!(f, "{pad}LEFT_PAREN")?,
            SymbolKind::RightParen => writeln!(f, "{pad}RIGHT_PAREN")?,
            SymbolKind::Separator => writeln!(f, "{pad}SEPARATOR")?,
            SymbolKind::Identifier => writeln!(f, "{pad}IDENTIFIER {}", node.symbol.text)?,
            SymbolKind::Value => match node.symbol.forced {
                Some(ty) => writeln!(f, "{pad}VALUE {:?} as {ty}", node.symbol.text)?,
                None => writeln!(f, "{pad}VALUE {:?}", node.symbol.text)?,
            },
        }
        for child in &node.children {
            self.write_node(f, *child, indent + 1)?;
        }
        Ok(())
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        self.write_node(f, self.root(), 0)
    }
}

/// What one level of the builder reports back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Built {
    pub node: NodeId,
    pub closed_by_right_paren: bool,
    pub consumed: usize,
}

/// Recursive-descent builder for the text dialect.
///
/// Characters are classified one rune at a time but the cursor moves in
/// bytes, so each nested level restarts on a byte-sliced suffix of the input
/// and reports how many bytes it used.
pub struct TreeBuilder<'de> {
    filename: Option<&'de str>,
    whole: &'de str,
    max_depth: usize,
    tree: Tree,
}

#[derive(Default)]
struct Text {
    buf: String,
    start: Option<usize>,
    forced: Option<ValueType>,
}

impl<'de> TreeBuilder<'de> {
    pub fn new(filename: Option<&'de str>, whole: &'de str, max_depth: usize) -> Self {
        TreeBuilder {
            filename,
            whole,
            max_depth,
            tree: Tree::default(),
        }
    }

    pub fn build(mut self) -> Result<Tree, ParseError> {
        self.build_within(0, None, 0)?;
        Ok(self.tree)
    }

    fn source(&self) -> NamedSource<String> {
        NamedSource::new(self.filename.unwrap_or("<input>"), self.whole.to_string())
    }

    fn flush(&mut self, parent: NodeId, text: &mut Text) {
        let Some(start) = text.start.take() else {
            return;
        };
        let node = self.tree.add(
            SymbolKind::Value,
            std::mem::take(&mut text.buf),
            text.forced.take(),
            start,
        );
        self.tree.append(parent, node);
    }

    /// Builds one nesting level from `base` (a byte offset into the whole
    /// input) until its closing `)` or the end of the input.
    pub fn build_within(
        &mut self,
        base: usize,
        parent: Option<NodeId>,
        depth: usize,
    ) -> Result<Built, ParseError> {
        if depth > self.max_depth {
            return Err(ParseError::TooDeep {
                src: self.source(),
                span: SourceSpan::from(base.saturating_sub(1)..base),
                limit: self.max_depth,
            });
        }

        let whole = self.whole;
        let src = &whole[base..];
        let node = self.tree.add(SymbolKind::Group, String::new(), None, base);
        let mut text = Text::default();
        let mut escaping = false;
        let mut quoting: Option<usize> = None;
        let mut pos = 0;

        while let Some(c) = src[pos..].chars().next() {
            let at = base + pos;
            let width = c.len_utf8();

            if escaping {
                escaping = false;
                text.start.get_or_insert(at);
                text.buf.push(c);
                pos += width;
                continue;
            }
            if c == ESCAPE {
                escaping = true;
                pos += width;
                continue;
            }

            if quoting.is_some() {
                if c == PIPE {
                    quoting = None;
                    text.start.get_or_insert(at);
                    self.flush(node, &mut text);
                } else {
                    text.buf.push(c);
                }
                pos += width;
                continue;
            }

            match c {
                IDENT_SIGIL => {
                    let name_len = src[pos + width..]
                        .find(|c: char| !is_ident_char(c))
                        .unwrap_or(src.len() - pos - width);
                    if name_len == 0 {
                        // a lone `$` is just text
                        text.start.get_or_insert(at);
                        text.buf.push(c);
                        pos += width;
                        continue;
                    }
                    self.flush(node, &mut text);
                    let name = &src[pos + width..pos + width + name_len];
                    let ident = self
                        .tree
                        .add(SymbolKind::Identifier, name.to_string(), None, at);
                    self.tree.append(node, ident);
                    pos += width + name_len;
                }
                '(' => {
                    self.flush(node, &mut text);
                    let left = self.tree.add(SymbolKind::LeftParen, "(".into(), None, at);
                    self.tree.append(node, left);

                    let inner = self.build_within(at + width, Some(node), depth + 1)?;
                    self.tree.append(node, inner.node);
                    if inner.closed_by_right_paren {
                        let close = at + width + inner.consumed - 1;
                        let right = self.tree.add(SymbolKind::RightParen, ")".into(), None, close);
                        self.tree.append(node, right);
                    }
                    pos += width + inner.consumed;
                }
                ')' => {
                    if parent.is_none() {
                        return Err(ParseError::UnmatchedRightParen {
                            src: self.source(),
                            span: SourceSpan::from(at..at + width),
                        });
                    }
                    self.flush(node, &mut text);
                    return Ok(Built {
                        node,
                        closed_by_right_paren: true,
                        consumed: pos + width,
                    });
                }
                ',' => {
                    self.flush(node, &mut text);
                    let sep = self.tree.add(SymbolKind::Separator, ",".into(), None, at);
                    self.tree.append(node, sep);
                    pos += width;
                }
                PIPE => {
                    self.flush(node, &mut text);
                    quoting = Some(at);
                    text.start = Some(at);
                    text.forced = Some(ValueType::Str);
                    pos += width;
                }
                c => {
                    text.start.get_or_insert(at);
                    text.buf.push(c);
                    pos += width;
                }
            }
        }

        if let Some(open) = quoting {
            return Err(ParseError::UnterminatedQuote {
                src: self.source(),
                span: SourceSpan::from(open..self.whole.len()),
            });
        }
        if escaping {
            text.start.get_or_insert(base + pos - ESCAPE.len_utf8());
            text.buf.push(ESCAPE);
        }
        if parent.is_some() {
            // the `(` that opened this level sits just before `base`
            let open = base - 1;
            return Err(ParseError::UnmatchedLeftParen {
                src: self.source(),
                span: SourceSpan::from(open..base),
            });
        }
        self.flush(node, &mut text);

        Ok(Built {
            node,
            closed_by_right_paren: false,
            consumed: pos,
        })
    }
}

/// One lowered item of a nesting level before it is joined up.
enum Piece {
    Tree(TokenTree),
    /// Authored text, still to be trimmed and classified.
    Text(String),
}

impl Piece {
    fn is_blank(&self) -> bool {
        matches!(self, Piece::Text(text) if text.trim().is_empty())
    }
}

/// Appends a piece, merging runs of text.
fn push(pieces: &mut Vec<Piece>, piece: Piece) {
    if let (Piece::Text(text), Some(Piece::Text(prev))) = (&piece, pieces.last_mut()) {
        prev.push_str(text);
        return;
    }
    pieces.push(piece);
}

fn is_call_name(text: &str) -> bool {
    !text.is_empty() && text.chars().all(is_ident_char)
}

impl Tree {
    /// Lowers the whole tree into an evaluable form.
    ///
    /// `$NAME(...)` is a call, and so is a bare word written right against
    /// its `(` (as in `SET($HP, 10)`). Any other parenthesis stays literal
    /// text. Arguments are split on top-level commas; an argument that is a
    /// single piece of text is trimmed and classified, so ` 10` is a number.
    pub fn lower(&self) -> TokenTree {
        if self.is_empty() {
            return TokenTree::literal("");
        }
        join(self.pieces(&self.node(self.root()).children))
    }

    /// Lowers the tree as output text: every fragment is kept exactly as
    /// written and nothing is classified.
    pub fn lower_verbatim(&self) -> TokenTree {
        if self.is_empty() {
            return TokenTree::Concat(Vec::new());
        }
        let parts = self
            .pieces(&self.node(self.root()).children)
            .into_iter()
            .map(|piece| match piece {
                Piece::Tree(tree) => tree,
                Piece::Text(text) => TokenTree::literal(text),
            })
            .collect();
        TokenTree::Concat(parts)
    }

    fn pieces(&self, children: &[NodeId]) -> Vec<Piece> {
        let mut pieces = Vec::new();
        let mut i = 0;
        while let Some(&id) = children.get(i) {
            let symbol = &self.node(id).symbol;
            let opens_call = children
                .get(i + 1)
                .is_some_and(|next| self.node(*next).symbol.kind == SymbolKind::LeftParen);

            let callee = match symbol.kind {
                SymbolKind::Identifier if opens_call => Some(symbol.text.as_str()),
                SymbolKind::Value if opens_call && symbol.forced.is_none() => {
                    let name = symbol.text.trim_start();
                    if is_call_name(name) {
                        let lead = &symbol.text[..symbol.text.len() - name.len()];
                        if !lead.is_empty() {
                            push(&mut pieces, Piece::Text(lead.to_string()));
                        }
                        Some(name)
                    } else {
                        None
                    }
                }
                _ => None,
            };

            if let Some(name) = callee {
                // name, `(`, group and (always, once built) `)`
                let args = children
                    .get(i + 2)
                    .map(|group| self.arguments(*group))
                    .unwrap_or_default();
                push(&mut pieces, Piece::Tree(TokenTree::call(name, args)));
                i += 3;
                if children
                    .get(i)
                    .is_some_and(|next| self.node(*next).symbol.kind == SymbolKind::RightParen)
                {
                    i += 1;
                }
                continue;
            }

            match symbol.kind {
                SymbolKind::Identifier => {
                    push(&mut pieces, Piece::Tree(TokenTree::flag(&symbol.text)))
                }
                SymbolKind::Value if symbol.forced.is_some() => push(
                    &mut pieces,
                    Piece::Tree(TokenTree::literal(symbol.text.as_str())),
                ),
                SymbolKind::Value
                | SymbolKind::LeftParen
                | SymbolKind::RightParen
                | SymbolKind::Separator => push(&mut pieces, Piece::Text(symbol.text.clone())),
                SymbolKind::Group => {
                    for piece in self.pieces(&self.node(id).children) {
                        push(&mut pieces, piece);
                    }
                }
            }
            i += 1;
        }
        pieces
    }

    fn arguments(&self, group: NodeId) -> Vec<TokenTree> {
        let children = &self.node(group).children;
        let segments: Vec<&[NodeId]> = children
            .split(|id| self.node(*id).symbol.kind == SymbolKind::Separator)
            .collect();
        if let [only] = segments.as_slice() {
            if self.pieces(only).iter().all(Piece::is_blank) {
                return Vec::new();
            }
        }
        segments
            .into_iter()
            .map(|segment| join(self.pieces(segment)))
            .collect()
    }
}

/// Joins the pieces of one argument (or of the root).
fn join(mut pieces: Vec<Piece>) -> TokenTree {
    let meaningful = pieces.iter().filter(|piece| !piece.is_blank()).count();
    if meaningful <= 1 {
        return match pieces.into_iter().find(|piece| !piece.is_blank()) {
            Some(Piece::Tree(tree)) => tree,
            Some(Piece::Text(text)) => TokenTree::literal(Value::from_literal(text.trim())),
            None => TokenTree::literal(""),
        };
    }

    if let Some(Piece::Text(first)) = pieces.first_mut() {
        *first = first.trim_start().to_string();
    }
    if let Some(Piece::Text(last)) = pieces.last_mut() {
        *last = last.trim_end().to_string();
    }
    let parts = pieces
        .into_iter()
        .filter(|piece| !matches!(piece, Piece::Text(text) if text.is_empty()))
        .map(|piece| match piece {
            Piece::Tree(tree) => tree,
            Piece::Text(text) => TokenTree::literal(text),
        })
        .collect();
    TokenTree::Concat(parts)
}

/// Builds the tree for one piece of authored text.
pub fn build(input: &str, max_depth: usize) -> Result<Tree, ParseError> {
    TreeBuilder::new(None, input, max_depth).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tree: &Tree, id: NodeId) -> Vec<SymbolKind> {
        tree.node(id)
            .children
            .iter()
            .map(|c| tree.node(*c).symbol.kind)
            .collect()
    }

    fn lowered(input: &str) -> String {
        build(input, 64).unwrap().lower().to_string()
    }

    #[test]
    fn lowering_calls_and_references() {
        assert_eq!(lowered("$SET($HP, 10)"), "(SET $HP 10)");
        assert_eq!(lowered("SET($HP, 10)"), "(SET $HP 10)");
        assert_eq!(lowered("$FLAG_IS($NAME, |10|)"), r#"(FLAG_IS $NAME "10")"#);
        assert_eq!(lowered("$OUTPUT()"), "(OUTPUT)");
        assert_eq!(lowered("$OUTPUT(a,,b)"), r#"(OUTPUT "a" "" "b")"#);
        assert_eq!(lowered("$HP"), "$HP");
        assert_eq!(lowered(" 42 "), "42");
    }

    #[test]
    fn lowering_keeps_prose_literal() {
        assert_eq!(
            lowered("You have $GOLD coins (maybe)."),
            r#"(CONCAT "You have " $GOLD " coins (maybe).")"#
        );
        assert_eq!(lowered("Hello world(x)"), r#""Hello world(x)""#);
        assert_eq!(
            lowered("$OUTPUT(You see $ADD(1, 2) coins)"),
            r#"(OUTPUT (CONCAT "You see " (ADD 1 2) " coins"))"#
        );
    }

    #[test]
    fn verbatim_lowering_keeps_whitespace() {
        let tree = build("  Hi $NAME, ", 64).unwrap();
        assert_eq!(
            tree.lower_verbatim().to_string(),
            r#"(CONCAT "  Hi " $NAME ", ")"#
        );
    }

    #[test]
    fn call_with_arguments() {
        let tree = build("$SET($HP, 10)", 64).unwrap();
        let root = tree.root();
        assert_eq!(
            kinds(&tree, root),
            vec![
                SymbolKind::Identifier,
                SymbolKind::LeftParen,
                SymbolKind::Group,
                SymbolKind::RightParen
            ]
        );
        let group = tree.node(root).children[2];
        assert_eq!(
            kinds(&tree, group),
            vec![SymbolKind::Identifier, SymbolKind::Separator, SymbolKind::Value]
        );
        let ten = tree.node(group).children[2];
        assert_eq!(tree.node(ten).symbol.text, " 10");
    }

    #[test]
    fn text_and_references_keep_order() {
        let tree = build("You have $GOLD coins.", 64).unwrap();
        let root = tree.node(tree.root());
        let texts: Vec<_> = root
            .children
            .iter()
            .map(|c| tree.node(*c).symbol.text.as_str())
            .collect();
        assert_eq!(texts, vec!["You have ", "GOLD", " coins."]);
    }

    #[test]
    fn empty_parens_are_valid() {
        let tree = build("()", 64).unwrap();
        assert_eq!(
            kinds(&tree, tree.root()),
            vec![SymbolKind::LeftParen, SymbolKind::Group, SymbolKind::RightParen]
        );
        let group = tree.node(tree.root()).children[1];
        assert!(tree.node(group).children.is_empty());
    }

    #[test]
    fn nesting_depth() {
        let tree = build("a(b(c(d)))", 64).unwrap();
        assert_eq!(tree.paren_depth(), 3);
    }

    #[test]
    fn unmatched_parens() {
        assert!(matches!(
            build("$OUTPUT(hi", 64),
            Err(ParseError::UnmatchedLeftParen { .. })
        ));
        assert!(matches!(
            build("hi)", 64),
            Err(ParseError::UnmatchedRightParen { .. })
        ));
    }

    #[test]
    fn pipes_force_strings() {
        let tree = build("|10, (x)|", 64).unwrap();
        let root = tree.node(tree.root());
        assert_eq!(root.children.len(), 1);
        let literal = tree.node(root.children[0]);
        assert_eq!(literal.symbol.text, "10, (x)");
        assert_eq!(literal.symbol.forced, Some(ValueType::Str));
    }

    #[test]
    fn unterminated_pipe() {
        assert!(matches!(
            build("|open", 64),
            Err(ParseError::UnterminatedQuote { .. })
        ));
    }

    #[test]
    fn escapes_suppress_structure() {
        let tree = build("\\$5 \\(ok\\)", 64).unwrap();
        let root = tree.node(tree.root());
        assert_eq!(root.children.len(), 1);
        assert_eq!(tree.node(root.children[0]).symbol.text, "$5 (ok)");
    }

    #[test]
    fn multibyte_offsets() {
        let tree = build("é($Ü(ß), ñ)", 64);
        // `Ü` is not an identifier character, so `$` stays text
        let tree = tree.unwrap();
        let root = tree.node(tree.root());
        assert_eq!(tree.node(root.children[0]).symbol.text, "é");
        let group = tree.node(root.children[2]);
        let inner: Vec<_> = group
            .children
            .iter()
            .map(|c| tree.node(*c).symbol.kind)
            .collect();
        assert_eq!(
            inner,
            vec![
                SymbolKind::Value,
                SymbolKind::LeftParen,
                SymbolKind::Group,
                SymbolKind::RightParen,
                SymbolKind::Separator,
                SymbolKind::Value
            ]
        );
        assert_eq!(tree.node(*group.children.last().unwrap()).symbol.text, " ñ");
    }

    #[test]
    fn depth_limit() {
        let deep = "(".repeat(10) + &")".repeat(10);
        assert!(matches!(
            build(&deep, 4),
            Err(ParseError::TooDeep { limit: 4, .. })
        ));
        assert!(build(&deep, 10).is_ok());
    }
}
