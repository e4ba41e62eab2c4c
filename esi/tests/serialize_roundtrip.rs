//! spec.md §8 property 3: for XML trees built by the streamer with no ESI
//! directives, `serialize(parse(x)) == x`, modulo namespace-declaration
//! placement.

use std::collections::HashMap;

use esi::{Document, Node, StreamingContext};

fn parse(input: &str) -> (Document, Vec<Node>) {
    let doc = Document::new(HashMap::new(), true);
    let mut ctx = StreamingContext::new(doc, false, None);
    ctx.append(input).unwrap();
    ctx.flush(true).unwrap();
    let children = ctx.drain_ready().unwrap_or_default();
    (ctx.document, children)
}

fn serialize_all(document: &Document, nodes: &[Node]) -> String {
    nodes.iter().map(|n| document.serialize(n)).collect()
}

#[test]
fn roundtrips_nested_elements_with_attributes() {
    let input = r#"<div class="a" id="b"><span>hi</span></div>"#;
    let (document, nodes) = parse(input);
    assert_eq!(serialize_all(&document, &nodes), input);
}

#[test]
fn roundtrips_self_closing_elements() {
    let input = "before<br />after";
    let (document, nodes) = parse(input);
    assert_eq!(serialize_all(&document, &nodes), input);
}

#[test]
fn roundtrips_mixed_text_and_elements() {
    let input = "a<b>c</b>d<e>f</e>g";
    let (document, nodes) = parse(input);
    assert_eq!(serialize_all(&document, &nodes), input);
}

#[test]
fn roundtrips_namespace_declaration_when_declared_first() {
    let input = r#"<ns:tag xmlns:ns="http://example.com/ns" attr="v">text</ns:tag>"#;
    let (document, nodes) = parse(input);
    assert_eq!(serialize_all(&document, &nodes), input);
}

/// When the `xmlns` declaration doesn't come first in the source, the
/// serializer still emits namespace declarations before ordinary
/// attributes — equivalent markup, not byte-identical (the documented
/// "modulo namespace-declaration placement" carve-out).
#[test]
fn reorders_namespace_declaration_that_appears_after_attributes() {
    let input = r#"<ns:tag attr="v" xmlns:ns="http://example.com/ns">text</ns:tag>"#;
    let (document, nodes) = parse(input);
    let out = serialize_all(&document, &nodes);
    assert_eq!(out, r#"<ns:tag xmlns:ns="http://example.com/ns" attr="v">text</ns:tag>"#);
}
