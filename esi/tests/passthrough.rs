//! spec.md §8 property 2: input with no `<!--esi`, no ESI-prefixed tag, and
//! no default-namespace markup that the recognizer would otherwise touch is
//! emitted byte-identical.

use bytes::Bytes;
use esi::{EsiOptions, EsiStream};
use http::HeaderMap;
use url::Url;

async fn passthrough(input: &'static str) -> String {
    let stream = EsiStream::new(
        Url::parse("http://example.com/").unwrap(),
        HeaderMap::new(),
        EsiOptions::new(),
    )
    .unwrap();
    stream.transform_to_string(Bytes::from_static(input.as_bytes())).await.unwrap()
}

#[tokio::test]
async fn plain_prose_is_untouched() {
    let input = "Just some plain prose, no markup at all.";
    assert_eq!(passthrough(input).await, input);
}

#[tokio::test]
async fn ordinary_html_is_untouched() {
    let input = r#"<html><head><title>Hi</title></head><body><p class="a">text</p><img src="x.png"/></body></html>"#;
    assert_eq!(passthrough(input).await, input);
}

#[tokio::test]
async fn stray_angle_brackets_are_untouched() {
    let input = "a < b and c > d, and 2<3 too";
    assert_eq!(passthrough(input).await, input);
}

#[tokio::test]
async fn html_entities_are_untouched() {
    let input = "Tom &amp; Jerry &lt;3";
    assert_eq!(passthrough(input).await, input);
}
