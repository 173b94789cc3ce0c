// ---------------------------------------------------------------------------
// Mutations on a resolved location
// ---------------------------------------------------------------------------

use log::debug;

use crate::error::{TreeError, TreeResult};
use crate::node::{Content, Node};
use crate::path::Location;
use crate::xml::MAX_DEPTH;

fn stale(location: &Location) -> TreeError {
    TreeError::InvalidOperation(format!(
        "location at depth {} no longer addresses an element",
        location.depth()
    ))
}

/// Appends `payload` as the last child of the node at `anchor` and returns
/// the location of the inserted node. The grown tree must stay within
/// [`MAX_DEPTH`] so it can be parsed back.
pub fn insert(root: &mut Node, anchor: &Location, payload: Node) -> TreeResult<Location> {
    let depth = anchor.depth() + 1 + payload.depth();
    if depth > MAX_DEPTH {
        return Err(TreeError::InvalidOperation(format!(
            "inserting <{}> would nest elements {depth} levels deep (limit {MAX_DEPTH})",
            payload.name
        )));
    }
    let target = anchor.follow_mut(root).ok_or_else(|| stale(anchor))?;
    debug!("appending <{}> under <{}>", payload.name, target.name);
    target.children.push(Content::Element(payload));
    Ok(anchor.child(target.children.len() - 1))
}

/// Detaches the node at `location` from its parent and returns it. The
/// remaining siblings keep their order. The root can never be removed.
pub fn remove(root: &mut Node, location: &Location) -> TreeResult<Node> {
    let (parent_location, pos) = location
        .split_last()
        .ok_or_else(|| TreeError::InvalidOperation("cannot remove the root element".into()))?;
    let parent = parent_location.follow_mut(root).ok_or_else(|| stale(location))?;
    if !matches!(parent.children.get(pos), Some(Content::Element(_))) {
        return Err(stale(location));
    }
    let Content::Element(removed) = parent.children.remove(pos) else {
        return Err(stale(location));
    };
    parent.coalesce_text();
    debug!("removed <{}> from <{}>", removed.name, parent.name);
    Ok(removed)
}

/// Replaces everything below the root with `elements`, keeping the root's
/// own name and attributes.
pub fn replace_payload(root: &mut Node, elements: Vec<Node>) {
    debug!("replacing payload of <{}> with {} element(s)", root.name, elements.len());
    root.children = elements.into_iter().map(Content::Element).collect();
}
