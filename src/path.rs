//! Path expressions: a restricted, self-contained subset of XPath location
//! paths. An expression is a `/`-separated list of child steps evaluated from
//! the document root, e.g. `/Dept[2]/Team[@name='infra']`.
//!
//! * A leading `/` is optional and an empty expression addresses the root.
//! * The root's own tag is never written as a step.
//! * `[n]` picks the n-th candidate, counting from 1.
//! * `[@attr='value']` keeps only candidates carrying that attribute value.
//! * `.` stays on the current node.
//!
//! Every step must narrow to exactly one element. Zero matches is a
//! [`TreeError::PathNotFound`], several matches without an index is a
//! [`TreeError::AmbiguousPath`].

use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::error::{TreeError, TreeResult};
use crate::node::{Content, Node};

// --- Tokens ---

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Name(String),
    Str(String),
    Num(usize),
    Slash,
    DSlash,
    Dot,
    DDot,
    At,
    LBrack,
    RBrack,
    Eq,
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn tokenize_path(input: &str) -> TreeResult<Vec<Tok>> {
    let mut toks = Vec::with_capacity(8);
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        match c {
            '/' if chars.next_if(|&(_, n)| n == '/').is_some() => toks.push(Tok::DSlash),
            '/' => toks.push(Tok::Slash),
            '.' if chars.next_if(|&(_, n)| n == '.').is_some() => toks.push(Tok::DDot),
            '.' => toks.push(Tok::Dot),
            '@' => toks.push(Tok::At),
            '[' => toks.push(Tok::LBrack),
            ']' => toks.push(Tok::RBrack),
            '=' => toks.push(Tok::Eq),
            q @ ('\'' | '"') => {
                let start = i + 1;
                let mut end = None;
                for (j, n) in chars.by_ref() {
                    if n == q {
                        end = Some(j);
                        break;
                    }
                }
                let end = end.ok_or_else(|| TreeError::bad_path(input, "unterminated string"))?;
                toks.push(Tok::Str(input[start..end].to_string()));
            }
            c if c.is_ascii_digit() => {
                let mut end = i + 1;
                while let Some((j, _)) = chars.next_if(|&(_, n)| n.is_ascii_digit()) {
                    end = j + 1;
                }
                let n = &input[i..end];
                let value = n
                    .parse()
                    .map_err(|_| TreeError::bad_path(input, format!("bad index: {n}")))?;
                toks.push(Tok::Num(value));
            }
            c if is_name_start(c) => {
                let mut end = i + c.len_utf8();
                while let Some((j, n)) = chars.next_if(|&(_, n)| is_name_char(n)) {
                    end = j + n.len_utf8();
                }
                let name = &input[i..end];
                if name.contains("::") {
                    return Err(TreeError::bad_path(input, "axes are not supported"));
                }
                toks.push(Tok::Name(name.to_string()));
            }
            '*' => return Err(TreeError::bad_path(input, "wildcards are not supported")),
            c => return Err(TreeError::bad_path(input, format!("unexpected character '{c}'"))),
        }
    }
    Ok(toks)
}

// --- AST ---

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    SelfNode,
    Child { name: String, predicates: Vec<Predicate> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    /// 1-based position among the remaining candidates.
    Index(usize),
    Attribute { name: String, value: String },
}

/// A parsed path expression. Keeps its source text for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    steps: Vec<Step>,
}

impl PathExpr {
    /// The expression addressing the document root.
    pub fn root() -> Self {
        Self { source: String::new(), steps: Vec::new() }
    }

    pub fn parse(input: &str) -> TreeResult<Self> {
        let toks = tokenize_path(input)?;
        let steps = PathParser { toks, pos: 0, input }.parse()?;
        Ok(Self { source: input.trim().to_string(), steps })
    }

    /// Absent or blank expressions mean the root.
    pub fn from_optional(input: Option<&str>) -> TreeResult<Self> {
        match input {
            Some(s) if !s.trim().is_empty() => Self::parse(s),
            _ => Ok(Self::root()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the expression can only ever address the root.
    pub fn is_root(&self) -> bool {
        self.steps.iter().all(|s| matches!(s, Step::SelfNode))
    }
}

impl FromStr for PathExpr {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.source)
        }
    }
}

// --- Parser ---

struct PathParser<'s> {
    toks: Vec<Tok>,
    pos: usize,
    input: &'s str,
}

impl PathParser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> TreeResult<()> {
        match self.advance() {
            Some(ref t) if t == tok => Ok(()),
            other => Err(self.error(format!("expected {what}, found {}", describe(other.as_ref())))),
        }
    }

    fn error(&self, reason: impl Into<String>) -> TreeError {
        TreeError::bad_path(self.input, reason)
    }

    fn parse(&mut self) -> TreeResult<Vec<Step>> {
        let mut steps = Vec::new();
        match self.peek() {
            None => return Ok(steps),
            Some(Tok::Slash) => {
                self.advance();
                if self.peek().is_none() {
                    return Ok(steps);
                }
            }
            _ => {}
        }

        loop {
            steps.push(self.parse_step()?);
            match self.advance() {
                None => break,
                Some(Tok::Slash) => {
                    if self.peek().is_none() {
                        return Err(self.error("trailing '/'"));
                    }
                }
                Some(Tok::DSlash) => return Err(self.error("descendant steps (//) are not supported")),
                Some(other) => return Err(self.error(format!("unexpected {}", describe(Some(&other))))),
            }
        }
        Ok(steps)
    }

    fn parse_step(&mut self) -> TreeResult<Step> {
        match self.advance() {
            Some(Tok::Dot) => {
                if self.peek() == Some(&Tok::LBrack) {
                    return Err(self.error("predicates are not allowed on '.'"));
                }
                Ok(Step::SelfNode)
            }
            Some(Tok::Name(name)) => {
                let mut predicates = Vec::new();
                while self.peek() == Some(&Tok::LBrack) {
                    self.advance();
                    predicates.push(self.parse_predicate()?);
                    self.expect(&Tok::RBrack, "']'")?;
                }
                Ok(Step::Child { name, predicates })
            }
            Some(Tok::DDot) => Err(self.error("parent steps (..) are not supported")),
            Some(Tok::DSlash) => Err(self.error("descendant steps (//) are not supported")),
            Some(Tok::At) => Err(self.error("attribute steps are not supported, use a [@name='value'] predicate")),
            other => Err(self.error(format!("expected element name, found {}", describe(other.as_ref())))),
        }
    }

    fn parse_predicate(&mut self) -> TreeResult<Predicate> {
        match self.advance() {
            Some(Tok::Num(0)) => Err(self.error("indices start at 1")),
            Some(Tok::Num(n)) => Ok(Predicate::Index(n)),
            Some(Tok::At) => {
                let name = match self.advance() {
                    Some(Tok::Name(n)) => n,
                    other => {
                        return Err(self.error(format!("expected attribute name, found {}", describe(other.as_ref()))))
                    }
                };
                self.expect(&Tok::Eq, "'='")?;
                match self.advance() {
                    Some(Tok::Str(value)) => Ok(Predicate::Attribute { name, value }),
                    other => Err(self.error(format!("expected quoted value, found {}", describe(other.as_ref())))),
                }
            }
            other => Err(self.error(format!("unsupported predicate starting with {}", describe(other.as_ref())))),
        }
    }
}

fn describe(tok: Option<&Tok>) -> String {
    match tok {
        None => "end of expression".into(),
        Some(Tok::Name(n)) => format!("name '{n}'"),
        Some(Tok::Str(s)) => format!("string '{s}'"),
        Some(Tok::Num(n)) => format!("number {n}"),
        Some(Tok::Slash) => "'/'".into(),
        Some(Tok::DSlash) => "'//'".into(),
        Some(Tok::Dot) => "'.'".into(),
        Some(Tok::DDot) => "'..'".into(),
        Some(Tok::At) => "'@'".into(),
        Some(Tok::LBrack) => "'['".into(),
        Some(Tok::RBrack) => "']'".into(),
        Some(Tok::Eq) => "'='".into(),
    }
}

// --- Resolution ---

/// Address of a node as the positions in each ancestor's `children` list,
/// starting below the root. Valid until the tree is next mutated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    positions: Vec<usize>,
}

impl Location {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.positions.len()
    }

    pub fn child(&self, position: usize) -> Self {
        let mut positions = self.positions.clone();
        positions.push(position);
        Self { positions }
    }

    /// Parent location and this node's position in the parent's children.
    pub fn split_last(&self) -> Option<(Location, usize)> {
        let (&last, parent) = self.positions.split_last()?;
        Some((Location { positions: parent.to_vec() }, last))
    }

    pub fn follow<'a>(&self, root: &'a Node) -> Option<&'a Node> {
        let mut current = root;
        for &pos in &self.positions {
            match current.children.get(pos) {
                Some(Content::Element(el)) => current = el,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn follow_mut<'a>(&self, root: &'a mut Node) -> Option<&'a mut Node> {
        let mut current = root;
        for &pos in &self.positions {
            match current.children.get_mut(pos) {
                Some(Content::Element(el)) => current = el,
                _ => return None,
            }
        }
        Some(current)
    }
}

enum Walk {
    Found(Location),
    Missing { step: usize },
    Ambiguous { step: usize, count: usize },
}

fn walk(root: &Node, expr: &PathExpr) -> Walk {
    let mut location = Location::root();
    let mut current = root;

    for (i, step) in expr.steps.iter().enumerate() {
        let Step::Child { name, predicates } = step else {
            continue;
        };
        let mut candidates: Vec<(usize, &Node)> =
            current.indexed_child_elements().filter(|(_, el)| el.name == *name).collect();

        for predicate in predicates {
            match predicate {
                Predicate::Attribute { name, value } => {
                    candidates.retain(|(_, el)| el.get_attribute(name) == Some(value.as_str()));
                }
                Predicate::Index(n) => {
                    candidates = candidates.get(n - 1).copied().into_iter().collect();
                }
            }
        }

        match candidates.as_slice() {
            [] => return Walk::Missing { step: i + 1 },
            [(pos, el)] => {
                location.positions.push(*pos);
                current = *el;
            }
            many => return Walk::Ambiguous { step: i + 1, count: many.len() },
        }
    }
    Walk::Found(location)
}

/// Resolves `expr` against `root`. `Ok(None)` when a step matches nothing,
/// `Err(AmbiguousPath)` when a step matches several nodes.
pub fn resolve(root: &Node, expr: &PathExpr) -> TreeResult<Option<Location>> {
    match walk(root, expr) {
        Walk::Found(location) => Ok(Some(location)),
        Walk::Missing { .. } => Ok(None),
        Walk::Ambiguous { step, count } => {
            Err(TreeError::AmbiguousPath { path: expr.to_string(), step, count })
        }
    }
}

/// Like [`resolve`] but treats a missing node as an error.
pub fn locate(root: &Node, expr: &PathExpr) -> TreeResult<Location> {
    match walk(root, expr) {
        Walk::Found(location) => {
            debug!("path '{expr}' resolved at depth {}", location.depth());
            Ok(location)
        }
        Walk::Missing { step } => Err(TreeError::PathNotFound { path: expr.to_string(), step }),
        Walk::Ambiguous { step, count } => {
            Err(TreeError::AmbiguousPath { path: expr.to_string(), step, count })
        }
    }
}

/// Parses and resolves in one go, returning the addressed node.
pub fn select<'a>(root: &'a Node, expr: &str) -> TreeResult<&'a Node> {
    let expr = PathExpr::parse(expr)?;
    let location = locate(root, &expr)?;
    location
        .follow(root)
        .ok_or_else(|| TreeError::PathNotFound { path: expr.to_string(), step: location.depth() })
}
