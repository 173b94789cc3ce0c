// ---------------------------------------------------------------------------
// Node model: element tree owned top-down, no parent links
// ---------------------------------------------------------------------------

/// An element node. Attribute order and child order are kept exactly as read
/// so untouched subtrees re-serialize byte-for-byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Content>,
}

/// One entry in an element's content sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    Element(Node),
    Text(String),
    CData(String),
    Comment(String),
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attributes: Vec::new(), children: Vec::new() }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(Content::Element(child));
        self
    }

    /// Concatenated text and CDATA children, exactly as read.
    pub fn raw_text(&self) -> String {
        let mut s = String::new();
        for child in &self.children {
            if let Content::Text(t) | Content::CData(t) = child {
                s.push_str(t);
            }
        }
        s
    }

    /// Returns text content, trimmed. `None` when the node carries no text.
    pub fn text(&self) -> Option<String> {
        let s = self.raw_text();
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == s.len() {
            Some(s)
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Node> {
        self.children.iter().filter_map(|c| match c {
            Content::Element(el) => Some(el),
            _ => None,
        })
    }

    /// Like `child_elements`, paired with each element's position in `children`.
    pub fn indexed_child_elements(&self) -> impl Iterator<Item = (usize, &Node)> {
        self.children.iter().enumerate().filter_map(|(i, c)| match c {
            Content::Element(el) => Some((i, el)),
            _ => None,
        })
    }

    pub fn child_element_count(&self) -> usize {
        self.children.iter().filter(|c| matches!(c, Content::Element(_))).count()
    }

    /// Number of element levels in this subtree, counting the node itself.
    /// Walks with an explicit stack so arbitrarily deep trees are safe.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1)];
        while let Some((node, level)) = pending.pop() {
            deepest = deepest.max(level);
            pending.extend(node.child_elements().map(|el| (el, level + 1)));
        }
        deepest
    }

    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Overwrites in place when the attribute exists, otherwise appends.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// Merges runs of adjacent text nodes. A removal can leave two text
    /// siblings touching, which would otherwise re-parse as one.
    pub(crate) fn coalesce_text(&mut self) {
        let mut merged: Vec<Content> = Vec::with_capacity(self.children.len());
        for child in std::mem::take(&mut self.children) {
            if let (Some(Content::Text(prev)), Content::Text(next)) = (merged.last_mut(), &child) {
                prev.push_str(next);
                continue;
            }
            merged.push(child);
        }
        self.children = merged;
    }
}
