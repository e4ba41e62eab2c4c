//! The ESI transformer: consumes elements from the streaming
//! context and rewrites ESI directives into their replacement nodes.
//!
//! This is the concrete, ESI-specific instantiation of the generic
//! element-rewrite pass; see `walker.rs` for why it's a direct async
//! recursive function rather than a reusable higher-order combinator
//! wrapping an arbitrary synchronous callback.

use async_recursion::async_recursion;
use http::{HeaderMap, HeaderValue, Method};
use log::{debug, trace, warn};
use url::Url;

use crate::config::{EsiOptions, IncludeInfo};
use crate::document::{Document, ElementId, Node, ESI_NAMESPACE};
use crate::error::{EsiError, Result};
use crate::expr::evaluate;
use crate::fetch::{FetchRequest, Fetcher};
use crate::subst::substitute_text;
use crate::vars::Variables;

/// Everything the transformer needs to resolve one top-level subtree: the
/// include base, the fetcher and variable resolver, and the configured
/// include-response/error hooks. Borrowed for the duration of one
/// `transform_root` call.
pub struct TransformContext<'a> {
    pub base_url: &'a Url,
    pub base_headers: &'a HeaderMap,
    pub fetcher: &'a dyn Fetcher,
    pub vars: &'a dyn Variables,
    pub options: &'a EsiOptions,
    pub depth: u32,
}

/// Transforms a completed top-level subtree (the children handed over by
/// [`crate::context::StreamingContext::drain_ready`]) in place, applying ESI
/// semantics, and returns the replacement node list to serialize.
pub async fn transform_root(
    document: &mut Document,
    children: Vec<Node>,
    ctx: &TransformContext<'_>,
) -> Result<Vec<Node>> {
    transform_children(document, children, ctx, false).await
}

#[async_recursion(?Send)]
async fn transform_children(
    document: &mut Document,
    children: Vec<Node>,
    ctx: &TransformContext<'_>,
    apply_vars: bool,
) -> Result<Vec<Node>> {
    let mut out = Vec::with_capacity(children.len());
    for node in children {
        match node {
            Node::Text(text) => {
                let text = if apply_vars { substitute_text(&text, ctx.vars) } else { text };
                out.push(Node::Text(text));
            }
            Node::Element(id) => {
                if document.namespace(id) != ESI_NAMESPACE {
                    let inner = document.children(id).to_vec();
                    let transformed = transform_children(document, inner, ctx, apply_vars).await?;
                    *document.children_mut(id) = transformed;
                    out.push(Node::Element(id));
                } else {
                    let replacement = transform_esi_element(document, id, ctx).await?;
                    out.extend(replacement);
                }
            }
        }
    }
    Ok(out)
}

async fn transform_esi_element(document: &mut Document, id: ElementId, ctx: &TransformContext<'_>) -> Result<Vec<Node>> {
    match document.local_name(id) {
        "comment" | "remove" => Ok(Vec::new()),

        "include" => match handle_include(document, id, ctx).await? {
            Some(content) => Ok(vec![Node::Text(content)]),
            None => Ok(Vec::new()),
        },

        "vars" => {
            let inner = document.children(id).to_vec();
            transform_children(document, inner, ctx, true).await
        }

        "try" => transform_try(document, id, ctx).await,

        "choose" => transform_choose(document, id, ctx).await,

        "attempt" | "except" => Err(EsiError::Structure(
            "esi:attempt/esi:except may only appear inside esi:try".to_string(),
            Some(id),
        )),

        "when" | "otherwise" => Err(EsiError::Structure(
            "esi:when/esi:otherwise may only appear inside esi:choose".to_string(),
            Some(id),
        )),

        other => Err(EsiError::Structure(format!("Unknown esi tag esi:{other}"), Some(id))),
    }
}

fn element_children_named(document: &Document, id: ElementId, name: &str) -> Vec<ElementId> {
    document
        .children(id)
        .iter()
        .filter_map(|n| match n {
            Node::Element(child) if document.local_name(*child) == name => Some(*child),
            _ => None,
        })
        .collect()
}

async fn transform_try(document: &mut Document, id: ElementId, ctx: &TransformContext<'_>) -> Result<Vec<Node>> {
    let attempts = element_children_named(document, id, "attempt");
    let excepts = element_children_named(document, id, "except");
    if attempts.len() != 1 || excepts.len() != 1 {
        return Err(EsiError::Structure(
            "esi:try must contain exactly one esi:attempt and one esi:except".to_string(),
            Some(id),
        ));
    }
    let attempt_id = attempts[0];
    let except_id = excepts[0];

    trace!("esi:try: entering esi:attempt");
    let attempt_children = document.children(attempt_id).to_vec();
    match transform_children(document, attempt_children, ctx, true).await {
        Ok(nodes) => Ok(nodes),
        Err(err) if err.is_include_error() => {
            debug!("esi:try: esi:attempt failed with {err}, falling back to esi:except");
            let except_children = document.children(except_id).to_vec();
            transform_children(document, except_children, ctx, true).await
        }
        Err(err) => Err(err),
    }
}

async fn transform_choose(document: &mut Document, id: ElementId, ctx: &TransformContext<'_>) -> Result<Vec<Node>> {
    let whens = element_children_named(document, id, "when");
    let otherwises = element_children_named(document, id, "otherwise");
    if whens.is_empty() || otherwises.len() > 1 {
        return Err(EsiError::Structure(
            "esi:choose must contain at least one esi:when and at most one esi:otherwise".to_string(),
            Some(id),
        ));
    }

    for (index, when_id) in whens.iter().enumerate() {
        let test = document.attr(*when_id, "test").unwrap_or_default().to_string();
        if evaluate(&test, ctx.vars) {
            debug!("esi:choose: esi:when #{index} (test=\"{test}\") matched");
            let when_children = document.children(*when_id).to_vec();
            return transform_children(document, when_children, ctx, true).await;
        }
    }
    if let Some(otherwise_id) = otherwises.first() {
        debug!("esi:choose: no esi:when matched, falling back to esi:otherwise");
        let otherwise_children = document.children(*otherwise_id).to_vec();
        return transform_children(document, otherwise_children, ctx, true).await;
    }
    debug!("esi:choose: no esi:when matched and no esi:otherwise, removing element");
    Ok(Vec::new())
}

async fn handle_include(document: &mut Document, id: ElementId, ctx: &TransformContext<'_>) -> Result<Option<String>> {
    let Some(src) = document.attr(id, "src").map(str::to_string) else {
        return Err(EsiError::Structure("esi:include requires a src attribute".to_string(), Some(id)));
    };
    let alt = document.attr(id, "alt").map(str::to_string);
    let onerror = document.attr(id, "onerror").map(str::to_string);

    let mut candidates = vec![substitute_text(&src, ctx.vars)];
    if let Some(alt) = alt {
        candidates.push(substitute_text(&alt, ctx.vars));
    }
    let onerror = onerror.map(|s| substitute_text(&s, ctx.vars));

    let mut last_info: Option<IncludeInfo> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        let url = match ctx.base_url.join(candidate) {
            Ok(u) => u,
            Err(_) => continue,
        };
        let mut headers = ctx.base_headers.clone();
        if url.host_str() != ctx.base_url.host_str() {
            if let Some(host) = url.host_str() {
                if let Ok(value) = HeaderValue::from_str(host) {
                    headers.insert(http::header::HOST, value);
                }
            }
        }
        let info = IncludeInfo { url: url.clone(), headers: headers.clone() };
        let request = FetchRequest { method: Method::GET, url, headers };

        debug!("esi:include: requesting fragment {}", info.url);
        let fetch_result = ctx.fetcher.fetch(request).await;
        match fetch_result {
            Ok(resp) if resp.is_success() => {
                trace!("esi:include: fragment {} fetched with status {}", info.url, resp.status);
                let content = match &ctx.options.process_include_response {
                    Some(processor) => processor.process(&info, resp).await?,
                    None => resp.text()?,
                };
                return Ok(Some(content));
            }
            Ok(resp) => {
                warn!("esi:include: fragment {} returned status {}", info.url, resp.status);
                last_info = Some(info);
            }
            Err(err) => {
                warn!("esi:include: fragment {} failed: {err}", info.url);
                last_info = Some(info);
            }
        }
        if index + 1 < candidates.len() {
            debug!("esi:include: trying alt candidate after failure");
        }
    }

    if let (Some(handler), Some(info)) = (&ctx.options.handle_include_error, &last_info) {
        if let Some(custom) = handler.handle(info) {
            debug!("esi:include: handle_include_error supplied a replacement for {}", info.url);
            return Ok(Some(custom));
        }
    }

    if onerror.as_deref() == Some("continue") {
        debug!("esi:include: all candidates failed, onerror=\"continue\"");
        return Ok(None);
    }

    warn!("esi:include: all candidates failed for {}", candidates.join(", "));
    Err(EsiError::Include(candidates.join(", "), Some(id)))
}
