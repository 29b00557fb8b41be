use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("Unexpected end of input at line {0}")]
    UnexpectedEof(usize),
    #[error("Unexpected token at line {0}: {1}")]
    UnexpectedToken(usize, String),
}

impl ParseError {
    pub fn line(&self) -> usize {
        match self {
            ParseError::UnexpectedEof(line) | ParseError::UnexpectedToken(line, _) => *line,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SExp {
    Atom(String),
    List(Vec<SExp>),
}

impl SExp {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            SExp::Atom(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExp]> {
        match self {
            SExp::List(items) => Some(items),
            _ => None,
        }
    }

    /// The leading atom of a list, e.g. `symbol` for `(symbol "R" ...)`.
    pub fn tag(&self) -> Option<&str> {
        self.as_list()
            .and_then(|items| items.first())
            .and_then(|first| first.as_atom())
    }

    /// The atom at position `index` of a list (0 is the tag).
    pub fn atom_at(&self, index: usize) -> Option<&str> {
        self.as_list()
            .and_then(|items| items.get(index))
            .and_then(|item| item.as_atom())
    }

    /// First child list whose tag is `key`.
    pub fn child(&self, key: &str) -> Option<&SExp> {
        self.as_list()?
            .iter()
            .find(|item| item.tag() == Some(key))
    }

    /// All child lists whose tag is `key`.
    pub fn children(&self, key: &str) -> Vec<&SExp> {
        match self {
            SExp::List(items) => items.iter().filter(|item| item.tag() == Some(key)).collect(),
            _ => Vec::new(),
        }
    }

    /// Value of a `(key value)` child.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.child(key).and_then(|c| c.atom_at(1))
    }

    /// `(key yes)` / `(key no)` flags, and the bare `key` atom form used by
    /// older files (e.g. `hide`).
    pub fn flag(&self, key: &str) -> Option<bool> {
        if let Some(child) = self.child(key) {
            return Some(child.atom_at(1).map(|v| v == "yes").unwrap_or(true));
        }
        let bare = self
            .as_list()?
            .iter()
            .skip(1)
            .any(|item| item.as_atom() == Some(key));
        bare.then_some(true)
    }

    /// Parse `(key x y)` into a pair of floats.
    pub fn point_of(&self, key: &str) -> Option<(f64, f64)> {
        let child = self.child(key)?;
        let x = child.atom_at(1)?.parse().ok()?;
        let y = child.atom_at(2)?.parse().ok()?;
        Some((x, y))
    }
}

impl fmt::Display for SExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SExp::Atom(s) => {
                if needs_quotes(s) {
                    write!(f, "{}", quote(s))
                } else {
                    write!(f, "{}", s)
                }
            }
            SExp::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || s
            .chars()
            .any(|c| c.is_whitespace() || c == '(' || c == ')' || c == '"' || c == '\\')
}

/// Quote a string the way KiCad writes it.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// An expression together with the byte range `start..end` it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub start: usize,
    pub end: usize,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Atom(String),
    List(Vec<Spanned>),
}

impl Spanned {
    pub fn into_sexp(self) -> SExp {
        match self.node {
            Node::Atom(s) => SExp::Atom(s),
            Node::List(items) => SExp::List(items.into_iter().map(Spanned::into_sexp).collect()),
        }
    }

    pub fn as_atom(&self) -> Option<&str> {
        match &self.node {
            Node::Atom(s) => Some(s),
            Node::List(_) => None,
        }
    }

    /// The item at position `index` of a list when it is an atom.
    pub fn atom_at(&self, index: usize) -> Option<&Spanned> {
        match &self.node {
            Node::List(items) => items.get(index).filter(|item| item.as_atom().is_some()),
            Node::Atom(_) => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.atom_at(0).and_then(Spanned::as_atom)
    }

    /// Child lists, skipping atoms.
    pub fn lists(&self) -> impl Iterator<Item = &Spanned> {
        let items: &[Spanned] = match &self.node {
            Node::List(items) => items,
            Node::Atom(_) => &[],
        };
        items.iter().filter(|item| matches!(item.node, Node::List(_)))
    }
}

fn into_list(items: Vec<Spanned>) -> SExp {
    SExp::List(items.into_iter().map(Spanned::into_sexp).collect())
}

pub struct SExpParser {
    input: Vec<char>,
    pos: usize,
    /// Byte offset of `pos` in the source text.
    byte: usize,
    line: usize,
}

impl SExpParser {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            byte: 0,
            line: 1,
        }
    }

    /// Parse a single expression, failing on any malformed input.
    pub fn parse(&mut self) -> Result<SExp, ParseError> {
        self.parse_spanned().map(Spanned::into_sexp)
    }

    /// Like [`SExpParser::parse`], keeping the byte range of every node.
    pub fn parse_spanned(&mut self) -> Result<Spanned, ParseError> {
        self.skip_whitespace();
        if self.is_eof() {
            return Err(ParseError::UnexpectedEof(self.line));
        }
        self.parse_node()
    }

    /// Parse the root list, keeping every complete top-level child read
    /// before the first error. Returns `None` only when not even the root
    /// list could be opened.
    pub fn parse_lenient(&mut self) -> (Option<SExp>, Option<ParseError>) {
        self.skip_whitespace();
        if self.is_eof() {
            return (None, Some(ParseError::UnexpectedEof(self.line)));
        }
        if self.peek() != '(' {
            return match self.parse_node() {
                Ok(atom) => (Some(atom.into_sexp()), None),
                Err(e) => (None, Some(e)),
            };
        }

        self.advance();
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.is_eof() {
                return (Some(into_list(items)), Some(ParseError::UnexpectedEof(self.line)));
            }
            if self.peek() == ')' {
                self.advance();
                return (Some(into_list(items)), None);
            }
            match self.parse_node() {
                Ok(item) => items.push(item),
                Err(e) => return (Some(into_list(items)), Some(e)),
            }
        }
    }

    fn parse_node(&mut self) -> Result<Spanned, ParseError> {
        self.skip_whitespace();
        if self.is_eof() {
            return Err(ParseError::UnexpectedEof(self.line));
        }
        let start = self.byte;
        let node = match self.peek() {
            '(' => self.parse_list()?,
            ')' => return Err(ParseError::UnexpectedToken(self.line, "')'".to_string())),
            '"' => self.parse_string()?,
            _ => self.parse_symbol()?,
        };
        Ok(Spanned {
            start,
            end: self.byte,
            node,
        })
    }

    fn parse_list(&mut self) -> Result<Node, ParseError> {
        self.advance();
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            if self.is_eof() {
                return Err(ParseError::UnexpectedEof(self.line));
            }
            if self.peek() == ')' {
                self.advance();
                break;
            }
            items.push(self.parse_node()?);
        }

        Ok(Node::List(items))
    }

    fn parse_string(&mut self) -> Result<Node, ParseError> {
        let start_line = self.line;
        self.advance();
        let mut s = String::new();
        let mut escaped = false;

        while !self.is_eof() {
            let ch = self.peek();
            self.advance();
            if escaped {
                match ch {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    _ => s.push(ch),
                }
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                return Ok(Node::Atom(s));
            } else {
                s.push(ch);
            }
        }

        Err(ParseError::UnexpectedEof(start_line))
    }

    fn parse_symbol(&mut self) -> Result<Node, ParseError> {
        let mut s = String::new();

        while !self.is_eof() {
            let ch = self.peek();
            if ch.is_whitespace() || ch == '(' || ch == ')' || ch == '"' {
                break;
            }
            s.push(ch);
            self.advance();
        }

        if s.is_empty() {
            Err(ParseError::UnexpectedToken(self.line, "empty symbol".to_string()))
        } else {
            Ok(Node::Atom(s))
        }
    }

    fn skip_whitespace(&mut self) {
        while !self.is_eof() && self.peek().is_whitespace() {
            self.advance();
        }
    }

    fn peek(&self) -> char {
        self.input.get(self.pos).copied().unwrap_or('\0')
    }

    fn advance(&mut self) {
        if let Some(ch) = self.input.get(self.pos) {
            if *ch == '\n' {
                self.line += 1;
            }
            self.byte += ch.len_utf8();
            self.pos += 1;
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }
}
