//! Streaming context: owns the pending character buffer, the open-element
//! stack, and the top-level child list, and drives the chunk recognizer.

use crate::document::{AttributeEntry, Document, ElementId, Node};
use crate::error::Result;
use crate::recognizer::{self, RawAttribute, ScanEvent, TagName};

/// The cross-chunk buffering state handed to a `before_process` hook, e.g.
/// the ESI-comment pre-processor.
#[derive(Debug, Default)]
pub struct StreamerState {
    pub buffered_text: String,
    pub postponed_text: String,
}

/// Drives the recognizer over appended text, building an element tree in
/// `document`, and exposes completed top-level subtrees as they close.
pub struct StreamingContext {
    pub document: Document,
    ignore_default_tags: bool,
    before_process: Option<Box<dyn FnMut(&mut StreamerState) + Send>>,
    state: StreamerState,
    open_elements: Vec<ElementId>,
    root_children: Vec<Node>,
}

fn xmlns_decl(attr: &RawAttribute) -> Option<(String, String)> {
    match (&attr.prefix, attr.local.as_str()) {
        (None, "xmlns") => Some((String::new(), attr.value.clone())),
        (Some(p), _) if p == "xmlns" => Some((attr.local.clone(), attr.value.clone())),
        _ => None,
    }
}

impl StreamingContext {
    pub fn new(
        document: Document,
        ignore_default_tags: bool,
        before_process: Option<Box<dyn FnMut(&mut StreamerState) + Send>>,
    ) -> Self {
        Self {
            document,
            ignore_default_tags,
            before_process,
            state: StreamerState::default(),
            open_elements: Vec::new(),
            root_children: Vec::new(),
        }
    }

    /// Appends newly-received text and drives the recognizer as far as it
    /// can go. Returns once the buffer's head is `Unknown` (await more
    /// bytes) or fully consumed.
    pub fn append(&mut self, text: &str) -> Result<()> {
        if !self.state.postponed_text.is_empty() {
            let postponed = std::mem::take(&mut self.state.postponed_text);
            self.state.buffered_text = postponed + &self.state.buffered_text;
        }
        self.state.buffered_text.push_str(text);

        loop {
            if let Some(hook) = &mut self.before_process {
                hook(&mut self.state);
            }
            if self.state.buffered_text.is_empty() {
                break;
            }
            match recognizer::scan(&self.state.buffered_text, self.ignore_default_tags) {
                ScanEvent::Unknown => break,
                ScanEvent::Text { content, consumed } => {
                    self.push_text_node(content);
                    self.state.buffered_text.drain(..consumed);
                }
                ScanEvent::ElementOpen {
                    name,
                    attrs,
                    consumed,
                } => {
                    let id = self.open_element(name, attrs);
                    self.open_elements.push(id);
                    self.state.buffered_text.drain(..consumed);
                }
                ScanEvent::ElementSelfClose {
                    name,
                    attrs,
                    consumed,
                } => {
                    self.open_element(name, attrs);
                    self.state.buffered_text.drain(..consumed);
                }
                ScanEvent::ElementClose { name, consumed } => {
                    self.close_element(&name)?;
                    self.state.buffered_text.drain(..consumed);
                }
            }
        }

        for node in &self.root_children {
            if let Node::Element(id) = node {
                self.document.resolve_namespaces(*id)?;
            }
        }
        Ok(())
    }

    /// Any remaining buffered text becomes a trailing text node. If `force`,
    /// the open-element stack is cleared unconditionally, so the
    /// partially-built subtrees become dispatchable as-is.
    pub fn flush(&mut self, force: bool) -> Result<()> {
        if !self.state.buffered_text.is_empty() {
            let text = std::mem::take(&mut self.state.buffered_text);
            self.push_text_node(text);
        }
        if force {
            self.open_elements.clear();
        }
        for node in &self.root_children {
            if let Node::Element(id) = node {
                self.document.resolve_namespaces(*id)?;
            }
        }
        Ok(())
    }

    /// Takes the accumulated top-level children if the input is currently
    /// at depth 0 (nothing open spanning into the next chunk). Returns
    /// `None` while a top-level element is still open.
    pub fn drain_ready(&mut self) -> Option<Vec<Node>> {
        if self.open_elements.is_empty() && !self.root_children.is_empty() {
            Some(std::mem::take(&mut self.root_children))
        } else {
            None
        }
    }

    fn open_element(&mut self, name: TagName, attrs: Vec<RawAttribute>) -> ElementId {
        let parent = self.open_elements.last().copied();
        let id = self
            .document
            .create_element(name.local.clone(), name.prefix.clone(), parent);
        for attr in attrs {
            if let Some((prefix, uri)) = xmlns_decl(&attr) {
                self.document.add_namespace_def(id, prefix, uri);
            } else {
                self.document.push_attribute(
                    id,
                    AttributeEntry {
                        local: attr.local,
                        prefix: attr.prefix,
                        namespace: String::new(),
                        value: attr.value,
                    },
                );
            }
        }
        self.push_element_node(id);
        id
    }

    fn close_element(&mut self, name: &TagName) -> Result<()> {
        let Some(top) = self.open_elements.pop() else {
            return Err(crate::error::EsiError::ClosingEmptyStack(name.full()));
        };
        let top_prefix = self.document.local_prefix(top).map(str::to_string);
        let top_local = self.document.local_name(top).to_string();
        let top_full = match &top_prefix {
            Some(p) => format!("{p}:{top_local}"),
            None => top_local,
        };
        if top_full != name.full() {
            return Err(crate::error::EsiError::ClosingUnmatched(
                name.full(),
                top_full,
            ));
        }
        Ok(())
    }

    fn push_text_node(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        match self.open_elements.last().copied() {
            Some(top) => {
                let children = self.document.children_mut(top);
                if let Some(Node::Text(existing)) = children.last_mut() {
                    existing.push_str(&text);
                } else {
                    children.push(Node::Text(text));
                }
            }
            None => {
                if let Some(Node::Text(existing)) = self.root_children.last_mut() {
                    existing.push_str(&text);
                } else {
                    self.root_children.push(Node::Text(text));
                }
            }
        }
    }

    fn push_element_node(&mut self, id: ElementId) {
        match self.open_elements.last().copied() {
            Some(top) => self.document.push_child(top, Node::Element(id)),
            None => {
                self.document.set_parent(id, None);
                self.root_children.push(Node::Element(id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use std::collections::HashMap;

    fn ctx() -> StreamingContext {
        let doc = Document::new(HashMap::new(), true);
        StreamingContext::new(doc, false, None)
    }

    #[test]
    fn splits_and_recombines_across_chunks() {
        let mut c = ctx();
        c.append("<di").unwrap();
        assert!(c.drain_ready().is_none());
        c.append("v>hello</di").unwrap();
        c.append("v>").unwrap();
        let ready = c.drain_ready().unwrap();
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn closing_unmatched_tag_errors() {
        let mut c = ctx();
        c.append("<a></b>").unwrap_err();
    }

    #[test]
    fn closing_empty_stack_errors() {
        let mut c = ctx();
        c.append("</a>").unwrap_err();
    }

    #[test]
    fn top_level_text_merges_across_appends() {
        let mut c = ctx();
        c.append("foo").unwrap();
        c.append("bar").unwrap();
        let ready = c.drain_ready().unwrap();
        assert_eq!(ready, vec![Node::Text("foobar".to_string())]);
    }
}
