//! A generic pre-order/post-order tree walk with cycle detection
//!, and the `NodeTransform` sum type a transform callback
//! returns.
//!
//! The ESI transformer doesn't build on the generic [`walk`] here directly:
//! its callback needs to `.await` mid-traversal to resolve `esi:include`,
//! and a callback-parameterized walk over a mutable arena doesn't compose
//! with `async fn` without a fair amount of boxed-future machinery for no
//! real benefit, since the transformer is this walk's only caller. It
//! reimplements the same pre-order/splice-on-return shape as an async
//! recursive method instead (see `transform.rs`). `walk` remains the
//! synchronous, generic form for callers that don't need to suspend, e.g.
//! validation passes and the property tests in `tests/`.

use std::collections::HashSet;

use crate::document::{Document, ElementId, Node};
use crate::error::{EsiError, Result};

/// Returned from `before` to steer a [`walk`].
pub enum WalkControl {
    /// Continue the traversal normally.
    Continue,
    /// Halt the entire traversal immediately.
    Stop,
    /// Skip this node's subtree, but continue with its siblings.
    StopRecursion,
}

/// The result of a transform callback for one element: either
/// the element is unchanged and the walker should descend into it, or it is
/// removed, replaced by a single node, or replaced by a spliced list.
/// `Splice` is a first-class variant rather than a synthetic tree node: it
/// never needs to appear in the arena or any serialized output.
pub enum NodeTransform {
    Unchanged,
    Remove,
    Replace(Node),
    Splice(Vec<Node>),
}

/// Walks `root`'s subtree pre-order, calling `before` on entry and `after` on
/// exit (with the already-computed results of its children). Detects cycles
/// via [`Document::has_cycle`] and fails fast if one is found.
pub fn walk<R>(
    document: &Document,
    root: ElementId,
    before: &mut dyn FnMut(&Document, ElementId) -> WalkControl,
    after: &mut dyn FnMut(&Document, ElementId, Vec<R>) -> R,
) -> Result<Option<R>> {
    let mut seen = HashSet::new();
    walk_inner(document, root, before, after, &mut seen)
}

fn walk_inner<R>(
    document: &Document,
    id: ElementId,
    before: &mut dyn FnMut(&Document, ElementId) -> WalkControl,
    after: &mut dyn FnMut(&Document, ElementId, Vec<R>) -> R,
    seen: &mut HashSet<ElementId>,
) -> Result<Option<R>> {
    if !seen.insert(id) {
        return Err(EsiError::Cycle(document.local_name(id).to_string()));
    }

    match before(document, id) {
        WalkControl::Stop => return Ok(None),
        WalkControl::StopRecursion => return Ok(Some(after(document, id, Vec::new()))),
        WalkControl::Continue => {}
    }

    let mut child_results = Vec::new();
    for child in document.children(id) {
        if let Node::Element(child_id) = child {
            match walk_inner(document, *child_id, before, after, seen)? {
                Some(r) => child_results.push(r),
                None => return Ok(None),
            }
        }
    }
    Ok(Some(after(document, id, child_results)))
}
