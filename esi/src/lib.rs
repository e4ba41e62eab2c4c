#![doc = include_str!("../../README.md")]

mod config;
mod context;
mod document;
mod error;
mod esi_comment;
mod expr;
mod fetch;
mod recognizer;
mod subst;
mod transform;
mod vars;
mod walker;

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use http::HeaderMap;
use log::{debug, error, trace};
use tokio::sync::mpsc;
use url::Url;

pub use crate::config::{EsiOptions, EsiPrefix, IncludeErrorHandler, IncludeInfo, IncludeResponseProcessor};
pub use crate::context::{StreamerState, StreamingContext};
pub use crate::document::{encode_entities, AttributeEntry, Document, ElementId, Node, ESI_NAMESPACE};
pub use crate::error::{EsiError, Result};
pub use crate::esi_comment::CommentPreProcessor;
pub use crate::expr::{evaluate, ExprValue};
pub use crate::fetch::{FetchRequest, FetchResponse, Fetcher, FnFetcher};
#[cfg(feature = "reqwest-fetcher")]
pub use crate::fetch::ReqwestFetcher;
pub use crate::transform::{transform_root, TransformContext};
pub use crate::vars::{quote, unquote, RequestVariables, Variables};
pub use crate::walker::{walk, NodeTransform, WalkControl};

use crate::fetch::NoFetcher;

/// How many completed output chunks may sit in the output channel before the
/// input side is suspended.
const OUTPUT_CHANNEL_CAPACITY: usize = 16;

type BoxByteStream = Pin<Box<dyn Stream<Item = io::Result<bytes::Bytes>> + Send>>;

/// Reassembles UTF-8 text across chunk boundaries, holding back the tail of
/// a chunk that ends mid-codepoint until the bytes that complete it arrive.
#[derive(Default)]
struct Utf8Framer {
    leftover: Vec<u8>,
}

impl Utf8Framer {
    fn push(&mut self, chunk: &[u8]) -> Result<String> {
        self.leftover.extend_from_slice(chunk);
        match std::str::from_utf8(&self.leftover) {
            Ok(s) => {
                let out = s.to_string();
                self.leftover.clear();
                Ok(out)
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                let out = String::from_utf8(self.leftover[..valid_up_to].to_vec())
                    .expect("prefix up to valid_up_to is always valid UTF-8");
                self.leftover.drain(..valid_up_to);
                Ok(out)
            }
        }
    }

    /// Called once the input stream is exhausted: anything still sitting in
    /// `leftover` is a truncated codepoint, not a chunk boundary.
    fn finish(self) -> Result<()> {
        if self.leftover.is_empty() {
            Ok(())
        } else {
            Err(EsiError::InvalidUtf8(
                String::from_utf8(self.leftover).unwrap_err(),
            ))
        }
    }
}

fn esi_namespaces(prefix: &EsiPrefix) -> HashMap<String, String> {
    let mut map = HashMap::new();
    match prefix {
        EsiPrefix::Default => {
            map.insert("esi".to_string(), document::ESI_NAMESPACE.to_string());
        }
        EsiPrefix::Named(name) => {
            map.insert(name.clone(), document::ESI_NAMESPACE.to_string());
        }
        EsiPrefix::Disabled => {}
    }
    map
}

/// A streaming ESI transform bound to one request's URL, headers, and
/// options. Construct once per request/fragment, then feed it
/// the response body.
pub struct EsiStream {
    url: Url,
    headers: HeaderMap,
    options: EsiOptions,
    depth: u32,
}

impl EsiStream {
    /// Creates a stream for the top-level request. Nested `esi:include`
    /// fetches build their own `EsiStream` at `depth + 1` internally (see
    /// [`RecursiveEsiProcessor`]).
    pub fn new(url: Url, headers: HeaderMap, options: EsiOptions) -> Result<Self> {
        Self::with_depth(url, headers, options, 0)
    }

    fn with_depth(url: Url, headers: HeaderMap, mut options: EsiOptions, depth: u32) -> Result<Self> {
        if let EsiPrefix::Named(name) = &options.esi_prefix {
            if !recognizer::is_valid_identifier(name) {
                return Err(EsiError::Configuration(name.clone()));
            }
        }

        if options.vars.is_none() {
            options.vars = Some(Arc::new(RequestVariables::from_request(&url, &headers)));
        }

        if options.fetcher.is_none() {
            options.fetcher = Some(default_fetcher());
        }

        if options.process_include_response.is_none() {
            options.process_include_response = Some(Arc::new(RecursiveEsiProcessor {
                options: options.clone(),
                depth: depth + 1,
            }));
        }

        Ok(Self { url, headers, options, depth })
    }

    /// Transforms `input` into the ESI-resolved output stream, applying
    /// backpressure through a bounded channel: when the consumer falls
    /// behind, this stops reading `input` until it catches up.
    pub fn transform(self, input: impl Stream<Item = io::Result<bytes::Bytes>> + Send + 'static) -> BoxByteStream {
        let (tx, rx) = mpsc::channel::<io::Result<bytes::Bytes>>(OUTPUT_CHANNEL_CAPACITY);
        let mut input: BoxByteStream = Box::pin(input);
        tokio::spawn(async move {
            if let Err(err) = self.drive(&mut input, &tx).await {
                error!("esi transform failed: {err}");
                let _ = tx
                    .send(Err(io::Error::new(io::ErrorKind::Other, err)))
                    .await;
            }
        });
        Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    /// Convenience wrapper for callers (and tests) that already have the
    /// whole body in memory: transforms it and collects the result into a
    /// single `String`.
    pub async fn transform_to_string(self, body: bytes::Bytes) -> Result<String> {
        let stream = self.transform(futures_util::stream::once(async move { Ok::<_, io::Error>(body) }));
        collect_to_string(stream).await
    }

    async fn drive(
        self,
        input: &mut BoxByteStream,
        tx: &mpsc::Sender<io::Result<bytes::Bytes>>,
    ) -> Result<()> {
        let document = Document::new(esi_namespaces(&self.options.esi_prefix), true);
        let mut comment_pp = CommentPreProcessor::new();
        let before_process: Box<dyn FnMut(&mut StreamerState) + Send> =
            Box::new(move |state: &mut StreamerState| comment_pp.process(state));
        let mut ctx = StreamingContext::new(document, true, Some(before_process));
        let mut framer = Utf8Framer::default();

        let transform_ctx = TransformContext {
            base_url: &self.url,
            base_headers: &self.headers,
            fetcher: self.options.fetcher.as_deref().expect("fetcher defaulted in with_depth"),
            vars: self.options.vars.as_deref().expect("vars defaulted in with_depth"),
            options: &self.options,
            depth: self.depth,
        };

        while let Some(chunk) = input.next().await {
            let chunk = chunk.map_err(EsiError::Read)?;
            let text = framer.push(&chunk)?;
            trace!("appending {} bytes of decoded text at depth {}", text.len(), self.depth);
            ctx.append(&text)?;
            if let Some(children) = ctx.drain_ready() {
                self.emit(&mut ctx.document, children, &transform_ctx, tx).await?;
            }
        }

        framer.finish()?;
        ctx.flush(true)?;
        if let Some(children) = ctx.drain_ready() {
            self.emit(&mut ctx.document, children, &transform_ctx, tx).await?;
        }
        Ok(())
    }

    async fn emit(
        &self,
        document: &mut Document,
        children: Vec<Node>,
        transform_ctx: &TransformContext<'_>,
        tx: &mpsc::Sender<io::Result<bytes::Bytes>>,
    ) -> Result<()> {
        let transformed = transform_root(document, children, transform_ctx).await?;
        let mut out = String::new();
        for node in &transformed {
            out.push_str(&document.serialize(node));
        }
        debug!("emitting {} bytes at depth {}", out.len(), self.depth);
        if tx.send(Ok(bytes::Bytes::from(out))).await.is_err() {
            trace!("output receiver dropped, stopping transform early");
        }
        Ok(())
    }
}

fn default_fetcher() -> Arc<dyn Fetcher> {
    #[cfg(feature = "reqwest-fetcher")]
    {
        Arc::new(ReqwestFetcher::default())
    }
    #[cfg(not(feature = "reqwest-fetcher"))]
    {
        Arc::new(NoFetcher)
    }
}

async fn collect_to_string(mut stream: BoxByteStream) -> Result<String> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk.map_err(EsiError::Read)?);
    }
    String::from_utf8(buf).map_err(EsiError::from)
}

/// The default [`IncludeResponseProcessor`]: runs the fetched
/// body back through a fresh `EsiStream` at `depth + 1`, so nested
/// `esi:include`s are resolved recursively without the host doing anything.
struct RecursiveEsiProcessor {
    options: EsiOptions,
    depth: u32,
}

impl IncludeResponseProcessor for RecursiveEsiProcessor {
    fn process<'a>(&'a self, info: &'a IncludeInfo, response: FetchResponse) -> BoxFuture<'a, Result<String>> {
        async move {
            let stream = EsiStream::with_depth(info.url.clone(), info.headers.clone(), self.options.clone(), self.depth)?;
            stream.transform_to_string(response.body).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_plain_text_through_unchanged() {
        let stream = EsiStream::new(
            Url::parse("http://example.com/").unwrap(),
            HeaderMap::new(),
            EsiOptions::new(),
        )
        .unwrap();
        let out = stream.transform_to_string(bytes::Bytes::from_static(b"<p>hello</p>")).await.unwrap();
        assert_eq!(out, "<p>hello</p>");
    }

    #[tokio::test]
    async fn strips_esi_comment_markers() {
        let stream = EsiStream::new(
            Url::parse("http://example.com/").unwrap(),
            HeaderMap::new(),
            EsiOptions::new(),
        )
        .unwrap();
        let out = stream
            .transform_to_string(bytes::Bytes::from_static(b"a<!--esi<b>hi</b>-->c"))
            .await
            .unwrap();
        assert_eq!(out, "a<b>hi</b>c");
    }

    #[tokio::test]
    async fn removes_esi_remove_block() {
        let stream = EsiStream::new(
            Url::parse("http://example.com/").unwrap(),
            HeaderMap::new(),
            EsiOptions::new(),
        )
        .unwrap();
        let out = stream
            .transform_to_string(bytes::Bytes::from_static(
                b"<esi:remove><p>fallback</p></esi:remove>kept",
            ))
            .await
            .unwrap();
        assert_eq!(out, "kept");
    }

    #[tokio::test]
    async fn invalid_esi_prefix_is_rejected_at_construction() {
        let err = EsiStream::new(
            Url::parse("http://example.com/").unwrap(),
            HeaderMap::new(),
            EsiOptions::new().with_esi_prefix("1nvalid"),
        )
        .unwrap_err();
        assert!(matches!(err, EsiError::Configuration(_)));
    }

    #[tokio::test]
    async fn include_without_fetcher_reports_fetch_error() {
        let stream = EsiStream::new(
            Url::parse("http://example.com/").unwrap(),
            HeaderMap::new(),
            EsiOptions::new(),
        )
        .unwrap();
        let err = stream
            .transform_to_string(bytes::Bytes::from_static(b"<esi:include src=\"/x\"/>"))
            .await
            .unwrap_err();
        assert!(matches!(err, EsiError::Include(_, _)));
    }
}
