//! The in-memory element tree: a `Document` owning an arena of `Element`
//! nodes, with namespace resolution and the insert/replace/remove
//! mutations the transform passes need.

use std::collections::HashMap;

use crate::error::{EsiError, Result};

/// The ESI 1.0 namespace URI.
pub const ESI_NAMESPACE: &str = "http://www.edge-delivery.org/esi/1.0";

/// Opaque handle to an element stored in a [`Document`]'s arena.
///
/// Cheap to copy, stable for the lifetime of the `Document` it came
/// from. Holding an `ElementId` does not keep anything alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub(crate) u32);

/// A child of an element or of the streaming context's root list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(ElementId),
    Text(String),
}

/// A single attribute, with its namespace resolved (or pending resolution).
#[derive(Debug, Clone)]
pub struct AttributeEntry {
    pub local: String,
    pub prefix: Option<String>,
    /// Empty until [`Document::resolve_namespaces`] has run for this element.
    pub namespace: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Synthetic {
    None,
    /// Wraps a single node so the walker has one entry point. Never reachable
    /// from user-visible APIs.
    Root,
}

#[derive(Debug, Clone)]
struct ElementData {
    local_name: String,
    local_prefix: Option<String>,
    namespace: String,
    attributes: Vec<AttributeEntry>,
    namespace_defs: Vec<(String, String)>,
    children: Vec<Node>,
    parent: Option<ElementId>,
    synthetic: Synthetic,
}

/// A prefix→namespace-URI mapping, immutable after construction, plus the
/// arena of elements built up while parsing and mutated by transform passes.
#[derive(Debug)]
pub struct Document {
    namespaces: HashMap<String, String>,
    allow_unknown_prefixes: bool,
    arena: Vec<ElementData>,
}

impl Document {
    /// Creates a document with the given prefix→URI declarations.
    /// `namespaces[""]` is the default (unprefixed) namespace, if any.
    pub fn new(namespaces: HashMap<String, String>, allow_unknown_prefixes: bool) -> Self {
        Self {
            namespaces,
            allow_unknown_prefixes,
            arena: Vec::new(),
        }
    }

    /// Creates a new element with no children and no attributes, parented
    /// under `parent` (or at the document root if `None`).
    pub fn create_element(
        &mut self,
        local_name: impl Into<String>,
        local_prefix: Option<String>,
        parent: Option<ElementId>,
    ) -> ElementId {
        self.push(ElementData {
            local_name: local_name.into(),
            local_prefix,
            namespace: String::new(),
            attributes: Vec::new(),
            namespace_defs: Vec::new(),
            children: Vec::new(),
            parent,
            synthetic: Synthetic::None,
        })
    }

    pub(crate) fn create_root_wrapper(&mut self, child: Node) -> ElementId {
        let id = self.push(ElementData {
            local_name: "_root".into(),
            local_prefix: None,
            namespace: String::new(),
            attributes: Vec::new(),
            namespace_defs: Vec::new(),
            children: vec![child],
            parent: None,
            synthetic: Synthetic::Root,
        });
        if let Some(Node::Element(child_id)) = self.data(id).children.first().copied() {
            self.data_mut(child_id).parent = Some(id);
        }
        id
    }

    fn push(&mut self, data: ElementData) -> ElementId {
        let id = ElementId(self.arena.len() as u32);
        self.arena.push(data);
        id
    }

    fn data(&self, id: ElementId) -> &ElementData {
        &self.arena[id.0 as usize]
    }

    fn data_mut(&mut self, id: ElementId) -> &mut ElementData {
        &mut self.arena[id.0 as usize]
    }

    pub fn local_name(&self, id: ElementId) -> &str {
        &self.data(id).local_name
    }

    pub fn local_prefix(&self, id: ElementId) -> Option<&str> {
        self.data(id).local_prefix.as_deref()
    }

    pub fn namespace(&self, id: ElementId) -> &str {
        &self.data(id).namespace
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.data(id).parent
    }

    pub fn set_parent(&mut self, id: ElementId, parent: Option<ElementId>) {
        self.data_mut(id).parent = parent;
    }

    pub fn children(&self, id: ElementId) -> &[Node] {
        &self.data(id).children
    }

    pub fn children_mut(&mut self, id: ElementId) -> &mut Vec<Node> {
        &mut self.data_mut(id).children
    }

    pub fn push_child(&mut self, id: ElementId, node: Node) {
        if let Node::Element(child_id) = node {
            self.data_mut(child_id).parent = Some(id);
        }
        self.data_mut(id).children.push(node);
    }

    pub fn attributes(&self, id: ElementId) -> &[AttributeEntry] {
        &self.data(id).attributes
    }

    pub fn push_attribute(&mut self, id: ElementId, attr: AttributeEntry) {
        self.data_mut(id).attributes.push(attr);
    }

    /// Looks up an unprefixed attribute by local name, e.g. `src` on `esi:include`.
    pub fn attr(&self, id: ElementId, local: &str) -> Option<&str> {
        self.data(id)
            .attributes
            .iter()
            .find(|a| a.prefix.is_none() && a.local == local)
            .map(|a| a.value.as_str())
    }

    pub fn namespace_defs(&self, id: ElementId) -> &[(String, String)] {
        &self.data(id).namespace_defs
    }

    /// Declares (or overwrites, keeping its original position) a prefix→URI
    /// mapping on `id`, preserving declaration order for serialization.
    pub fn add_namespace_def(&mut self, id: ElementId, prefix: impl Into<String>, uri: String) {
        let prefix = prefix.into();
        let defs = &mut self.data_mut(id).namespace_defs;
        match defs.iter_mut().find(|(p, _)| *p == prefix) {
            Some(entry) => entry.1 = uri,
            None => defs.push((prefix, uri)),
        }
    }

    pub(crate) fn is_synthetic_root(&self, id: ElementId) -> bool {
        self.data(id).synthetic == Synthetic::Root
    }

    /// Resolves the namespace of `id` and every element reachable from it,
    /// including attribute namespaces. Call once an element's attributes and
    /// `xmlns*` declarations are fully parsed, before it is handed to a
    /// transform.
    pub fn resolve_namespaces(&mut self, id: ElementId) -> Result<()> {
        let key = self.data(id).local_prefix.clone().unwrap_or_default();
        let ns = self.lookup_namespace(id, &key)?;
        self.data_mut(id).namespace = ns;

        let attr_count = self.data(id).attributes.len();
        for i in 0..attr_count {
            let prefix = self.data(id).attributes[i].prefix.clone();
            // Unprefixed attributes have no namespace (they are not subject
            // to the default namespace, per XML namespace rules).
            let ns = match &prefix {
                Some(p) => self.lookup_namespace(id, p)?,
                None => String::new(),
            };
            self.data_mut(id).attributes[i].namespace = ns;
        }

        let children = self.data(id).children.clone();
        for child in children {
            if let Node::Element(child_id) = child {
                self.resolve_namespaces(child_id)?;
            }
        }
        Ok(())
    }

    fn lookup_namespace(&self, start: ElementId, key: &str) -> Result<String> {
        let mut cur = Some(start);
        while let Some(id) = cur {
            if let Some((_, uri)) = self.data(id).namespace_defs.iter().find(|(p, _)| p == key) {
                return Ok(uri.clone());
            }
            cur = self.data(id).parent;
        }
        if let Some(uri) = self.namespaces.get(key) {
            return Ok(uri.clone());
        }
        if key.is_empty() {
            // No default namespace declared anywhere: that's not an error,
            // it just means the element is in no namespace.
            return Ok(String::new());
        }
        if self.allow_unknown_prefixes {
            Ok(String::new())
        } else {
            Err(EsiError::UnknownPrefix(key.to_string()))
        }
    }

    /// Walks from `start` following `parent` links and returns `true` if any
    /// ancestor is revisited, i.e. the parent chain cycles.
    pub fn has_cycle(&self, start: ElementId) -> bool {
        let mut seen = std::collections::HashSet::new();
        let mut cur = Some(start);
        while let Some(id) = cur {
            if !seen.insert(id) {
                return true;
            }
            cur = self.data(id).parent;
        }
        false
    }

    /// Serializes `node`: self-closing for empty children, otherwise an open
    /// tag, serialized children, and a matching close tag. Attribute values
    /// are XML-entity encoded.
    pub fn serialize(&self, node: &Node) -> String {
        let mut out = String::new();
        self.serialize_into(node, &mut out);
        out
    }

    fn serialize_into(&self, node: &Node, out: &mut String) {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(id) => {
                let data = self.data(*id);
                let full_name = match &data.local_prefix {
                    Some(p) => format!("{p}:{}", data.local_name),
                    None => data.local_name.clone(),
                };
                out.push('<');
                out.push_str(&full_name);
                for (prefix, uri) in &data.namespace_defs {
                    out.push(' ');
                    if prefix.is_empty() {
                        out.push_str("xmlns");
                    } else {
                        out.push_str("xmlns:");
                        out.push_str(prefix);
                    }
                    out.push_str("=\"");
                    out.push_str(&encode_entities(uri));
                    out.push('"');
                }
                for attr in &data.attributes {
                    out.push(' ');
                    if let Some(p) = &attr.prefix {
                        out.push_str(p);
                        out.push(':');
                    }
                    out.push_str(&attr.local);
                    out.push_str("=\"");
                    out.push_str(&encode_entities(&attr.value));
                    out.push('"');
                }
                if data.children.is_empty() {
                    out.push_str(" />");
                } else {
                    out.push('>');
                    for child in &data.children {
                        self.serialize_into(child, out);
                    }
                    out.push_str("</");
                    out.push_str(&full_name);
                    out.push('>');
                }
            }
        }
    }
}

/// Encodes `&`, `<`, `>`, `"`, `'` for use in an attribute value.
pub fn encode_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_default_namespace_from_document() {
        let mut ns = HashMap::new();
        ns.insert(String::new(), "http://example.com/default".to_string());
        let mut doc = Document::new(ns, false);
        let id = doc.create_element("div", None, None);
        doc.resolve_namespaces(id).unwrap();
        assert_eq!(doc.namespace(id), "http://example.com/default");
    }

    #[test]
    fn resolves_prefixed_namespace_declared_on_ancestor() {
        let doc_ns = HashMap::new();
        let mut doc = Document::new(doc_ns, false);
        let root = doc.create_element("html", None, None);
        doc.add_namespace_def(root, "esi", ESI_NAMESPACE.to_string());
        let child = doc.create_element("include", Some("esi".to_string()), Some(root));
        doc.push_child(root, Node::Element(child));

        doc.resolve_namespaces(root).unwrap();
        assert_eq!(doc.namespace(child), ESI_NAMESPACE);
    }

    #[test]
    fn unknown_prefix_errors_unless_allowed() {
        let mut doc = Document::new(HashMap::new(), false);
        let id = doc.create_element("include", Some("esi".to_string()), None);
        assert!(doc.resolve_namespaces(id).is_err());

        let mut doc = Document::new(HashMap::new(), true);
        let id = doc.create_element("include", Some("esi".to_string()), None);
        doc.resolve_namespaces(id).unwrap();
        assert_eq!(doc.namespace(id), "");
    }
}
