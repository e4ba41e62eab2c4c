//! spec.md §8 property 1: for any byte string and any partition into
//! chunks, appending the parts in order yields the same output as
//! appending the whole string at once.

use std::collections::HashMap;

use esi::{Document, StreamingContext};

fn run_chunks(chunks: &[&str]) -> String {
    let doc = Document::new(HashMap::new(), true);
    let mut ctx = StreamingContext::new(doc, false, None);
    let mut out = String::new();
    for chunk in chunks {
        ctx.append(chunk).unwrap();
        if let Some(children) = ctx.drain_ready() {
            for node in &children {
                out.push_str(&ctx.document.serialize(node));
            }
        }
    }
    ctx.flush(true).unwrap();
    if let Some(children) = ctx.drain_ready() {
        for node in &children {
            out.push_str(&ctx.document.serialize(node));
        }
    }
    out
}

#[test]
fn splitting_anywhere_yields_the_same_output() {
    let whole = r#"foo<div class="a"><span>bar</span></div>baz<br />tail"#;
    let baseline = run_chunks(&[whole]);
    for split in 1..whole.len() {
        if !whole.is_char_boundary(split) {
            continue;
        }
        let (a, b) = whole.split_at(split);
        assert_eq!(run_chunks(&[a, b]), baseline, "split at byte {split} diverged");
    }
}

#[test]
fn splitting_a_tag_across_three_chunks_reassembles() {
    let whole = r#"<esi:include src="/x" alt="/y"/>"#;
    let baseline = run_chunks(&[whole]);
    let a = &whole[..5];
    let b = &whole[5..20];
    let c = &whole[20..];
    assert_eq!(run_chunks(&[a, b, c]), baseline);
}

#[test]
fn splitting_mid_attribute_value_reassembles() {
    let whole = r#"<div data-x="hello world" data-y="ok">body</div>"#;
    let baseline = run_chunks(&[whole]);
    for split in [1, 4, 13, 20, 30, 40] {
        let (a, b) = whole.split_at(split);
        assert_eq!(run_chunks(&[a, b]), baseline, "split at byte {split} diverged");
    }
}

#[test]
fn splitting_into_many_single_byte_chunks_reassembles() {
    let whole = r#"a<b c="d">e</b>f<g/>h"#;
    let baseline = run_chunks(&[whole]);
    let singles: Vec<&str> = whole
        .char_indices()
        .map(|(i, c)| &whole[i..i + c.len_utf8()])
        .collect();
    assert_eq!(run_chunks(&singles), baseline);
}
