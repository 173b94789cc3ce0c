//! Read-modify-write cycles over a [`TreeStore`]. Each call loads one record,
//! runs the engine on a freshly parsed document and writes back only when the
//! whole operation succeeded.

use log::info;

use crate::document::{self, Document, MutationRequest, Outcome, ROOT_TAG};
use crate::error::{StoreError, StoreResult};
use crate::node::Node;
use crate::store::{StoredTree, TreeStore};
use crate::xml::Layout;

pub struct TreeService<S> {
    store: S,
}

impl<S: TreeStore> TreeService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn list(&self) -> StoreResult<Vec<StoredTree>> {
        let trees = self.store.list()?;
        if trees.is_empty() {
            return Err(StoreError::NoTrees);
        }
        Ok(trees)
    }

    pub fn get(&self, id: u64) -> StoreResult<StoredTree> {
        self.store.get(id)
    }

    pub fn create(&mut self, submission: &str) -> StoreResult<StoredTree> {
        let doc = Document::from_submission(submission)?;
        self.store.create(doc.to_envelope())
    }

    /// Replaces the stored body wholesale; the old body is never parsed.
    pub fn update(&mut self, id: u64, submission: &str) -> StoreResult<StoredTree> {
        let mut tree = self.store.get(id)?;
        let mut doc = Document { name: tree.tree_name.clone(), root: Node::new(ROOT_TAG) };
        doc.replace_from_submission(submission)?;
        tree.set_envelope(doc.to_envelope());
        self.store.put(&tree)?;
        Ok(tree)
    }

    pub fn delete(&mut self, id: u64) -> StoreResult<()> {
        self.store.delete(id)
    }

    /// Runs a request against tree `id`. Updated documents are persisted;
    /// extracts leave storage untouched.
    pub fn apply(&mut self, id: u64, request: &MutationRequest) -> StoreResult<Outcome> {
        let mut tree = self.store.get(id)?;
        let outcome = document::apply(&tree.envelope(), request)?;
        if let Outcome::Updated(envelope) = &outcome {
            tree.set_envelope(envelope.clone());
            self.store.put(&tree)?;
            info!("tree {id}: {} at '{}'", request_label(request), request.path());
        }
        Ok(outcome)
    }

    pub fn report(&self, id: u64, path: Option<&str>, layout: Layout) -> StoreResult<String> {
        let tree = self.store.get(id)?;
        let request = MutationRequest::extract(path, layout)?;
        match document::apply(&tree.envelope(), &request)? {
            Outcome::Extracted(text) => Ok(text),
            Outcome::Updated(envelope) => Ok(envelope.body),
        }
    }
}

fn request_label(request: &MutationRequest) -> &'static str {
    match request {
        MutationRequest::Insert { .. } => "insert",
        MutationRequest::Remove { .. } => "remove",
        MutationRequest::Extract { .. } => "extract",
    }
}
