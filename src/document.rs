use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{TreeError, TreeResult};
use crate::mutation;
use crate::node::Node;
use crate::path::{self, Location, PathExpr};
use crate::xml::{self, Layout};

/// Name given to trees whose submission carries no `TreeName`.
pub const DEFAULT_TREE_NAME: &str = "Unnamed Tree";
/// Tag of the element synthesized around submitted content.
pub const ROOT_TAG: &str = "Root";
/// Submission field holding the tree name. Never part of the stored body.
pub const NAME_FIELD: &str = "TreeName";

// ---------------------------------------------------------------------------
// Envelope: (name, body) pair exchanged with storage and transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub name: String,
    pub body: String,
}

impl Envelope {
    pub fn new(name: Option<&str>, body: impl Into<String>) -> Self {
        Self {
            name: name.unwrap_or(DEFAULT_TREE_NAME).to_string(),
            body: body.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Submission unwrapping
// ---------------------------------------------------------------------------

/// Content of a create/update submission: the wrapper element is discarded,
/// its `TreeName` child becomes the name and every other element child
/// becomes part of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub name: Option<String>,
    pub elements: Vec<Node>,
}

impl Submission {
    pub fn parse(xml: &str) -> TreeResult<Self> {
        let wrapper = xml::parse(xml)?;
        let mut name = None;
        let mut elements = Vec::new();
        for child in wrapper.child_elements() {
            if child.name == NAME_FIELD {
                if name.is_none() {
                    name = Some(child.raw_text());
                }
            } else {
                elements.push(child.clone());
            }
        }
        // A blank TreeName counts as absent.
        let name = name.filter(|n| !n.trim().is_empty());
        debug!(
            "submission <{}>: name {:?}, {} element(s)",
            wrapper.name,
            name,
            elements.len()
        );
        Ok(Self { name, elements })
    }
}

// ---------------------------------------------------------------------------
// Document: parsed form, lives for one operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub root: Node,
}

impl Document {
    /// Builds a fresh document from a creation submission.
    pub fn from_submission(xml: &str) -> TreeResult<Self> {
        let submission = Submission::parse(xml)?;
        let mut root = Node::new(ROOT_TAG);
        mutation::replace_payload(&mut root, submission.elements);
        Ok(Self {
            name: submission.name.unwrap_or_else(|| DEFAULT_TREE_NAME.to_string()),
            root,
        })
    }

    /// Reads a stored document back. Any well-formed root is accepted; an
    /// empty body is an empty `Root`.
    pub fn from_envelope(envelope: &Envelope) -> TreeResult<Self> {
        let root = if envelope.body.trim().is_empty() {
            Node::new(ROOT_TAG)
        } else {
            xml::parse(&envelope.body)?
        };
        Ok(Self { name: envelope.name.clone(), root })
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope { name: self.name.clone(), body: xml::serialize(&self.root) }
    }

    /// Replaces the whole tree body with a submission's elements under a new
    /// `Root`. A `TreeName` in the submission renames the document.
    pub fn replace_from_submission(&mut self, xml: &str) -> TreeResult<()> {
        let submission = Submission::parse(xml)?;
        let mut root = Node::new(ROOT_TAG);
        mutation::replace_payload(&mut root, submission.elements);
        self.root = root;
        if let Some(name) = submission.name {
            self.name = name;
        }
        Ok(())
    }

    pub fn locate(&self, path: &PathExpr) -> TreeResult<Location> {
        path::locate(&self.root, path)
    }

    pub fn insert(&mut self, path: &PathExpr, payload: Node) -> TreeResult<Location> {
        let anchor = self.locate(path)?;
        mutation::insert(&mut self.root, &anchor, payload)
    }

    pub fn remove(&mut self, path: &PathExpr) -> TreeResult<Node> {
        if path.is_root() {
            return Err(TreeError::InvalidOperation(
                "a path is required: the root element cannot be removed".into(),
            ));
        }
        let target = self.locate(path)?;
        mutation::remove(&mut self.root, &target)
    }

    /// Serializes only the addressed subtree.
    pub fn extract(&self, path: &PathExpr, layout: Layout) -> TreeResult<String> {
        let location = self.locate(path)?;
        let node = location
            .follow(&self.root)
            .ok_or_else(|| TreeError::PathNotFound { path: path.to_string(), step: location.depth() })?;
        Ok(xml::serialize_with(node, layout))
    }
}

// ---------------------------------------------------------------------------
// Mutation requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRequest {
    Insert { path: PathExpr, payload: Node },
    Remove { path: PathExpr },
    Extract { path: PathExpr, layout: Layout },
}

impl MutationRequest {
    pub fn insert(path: Option<&str>, payload_xml: &str) -> TreeResult<Self> {
        if payload_xml.trim().is_empty() {
            return Err(TreeError::MissingPayload("node XML is required".into()));
        }
        Ok(Self::Insert {
            path: PathExpr::from_optional(path)?,
            payload: xml::parse(payload_xml)?,
        })
    }

    pub fn remove(path: Option<&str>) -> TreeResult<Self> {
        Ok(Self::Remove { path: PathExpr::from_optional(path)? })
    }

    pub fn extract(path: Option<&str>, layout: Layout) -> TreeResult<Self> {
        Ok(Self::Extract { path: PathExpr::from_optional(path)?, layout })
    }

    /// Reads `<NewNode parent="PATH">CHILD</NewNode>`. The first element
    /// child is the payload; a missing `parent` means the root.
    pub fn from_add_node_xml(xml: &str) -> TreeResult<Self> {
        let wrapper = xml::parse(xml)?;
        let payload = wrapper.child_elements().next().cloned().ok_or_else(|| {
            TreeError::MissingPayload(format!(
                "no child element found inside the <{}> wrapper",
                wrapper.name
            ))
        })?;
        Ok(Self::Insert {
            path: PathExpr::from_optional(wrapper.get_attribute("parent"))?,
            payload,
        })
    }

    /// Reads `<RemoveNode path="PATH"/>`.
    pub fn from_remove_node_xml(xml: &str) -> TreeResult<Self> {
        let wrapper = xml::parse(xml)?;
        Self::remove(wrapper.get_attribute("path"))
    }

    pub fn path(&self) -> &PathExpr {
        match self {
            Self::Insert { path, .. } | Self::Remove { path } | Self::Extract { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The whole document after a successful mutation.
    Updated(Envelope),
    /// A serialized subtree; the document is unchanged.
    Extracted(String),
}

/// Runs one request against a stored document: parse, resolve, mutate,
/// re-serialize. Nothing is returned for storage unless every step succeeds.
pub fn apply(envelope: &Envelope, request: &MutationRequest) -> TreeResult<Outcome> {
    let mut doc = Document::from_envelope(envelope)?;
    let result = match request {
        MutationRequest::Insert { path, payload } => {
            doc.insert(path, payload.clone()).map(|_| Outcome::Updated(doc.to_envelope()))
        }
        MutationRequest::Remove { path } => doc.remove(path).map(|_| Outcome::Updated(doc.to_envelope())),
        MutationRequest::Extract { path, layout } => doc.extract(path, *layout).map(Outcome::Extracted),
    };
    if let Err(ref err) = result {
        warn!("request at '{}' on '{}' rejected: {err}", request.path(), envelope.name);
    }
    result
}
