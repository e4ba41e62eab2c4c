//! Stream configuration: a builder-style [`EsiOptions`] in the
//! `Configuration::default().with_namespace(..)` style.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::HeaderMap;
use url::Url;

use crate::error::Result;
use crate::fetch::{FetchResponse, Fetcher};
use crate::vars::Variables;

/// The URL and headers an `esi:include` was resolved against, handed to
/// `process_include_response` and `handle_include_error`.
#[derive(Debug, Clone)]
pub struct IncludeInfo {
    pub url: Url,
    pub headers: HeaderMap,
}

/// Post-processes a successful include response into replacement text.
/// Defaults to recursively running the same ESI stream over the body
/// when not configured.
pub trait IncludeResponseProcessor: Send + Sync {
    fn process<'a>(&'a self, info: &'a IncludeInfo, response: FetchResponse) -> BoxFuture<'a, Result<String>>;
}

/// Observes an `esi:include` that exhausted its `src`/`alt` candidates. May
/// return a replacement string to override the default failure handling.
pub trait IncludeErrorHandler: Send + Sync {
    fn handle(&self, info: &IncludeInfo) -> Option<String>;
}

/// How the ESI namespace prefix is configured.
#[derive(Debug, Clone)]
pub enum EsiPrefix {
    /// Use the default prefix, `esi`.
    Default,
    /// Use a custom, validated identifier as the prefix.
    Named(String),
    /// Disable implicit namespace declaration entirely: no tags match.
    Disabled,
}

impl Default for EsiPrefix {
    fn default() -> Self {
        EsiPrefix::Default
    }
}

/// Options accepted by [`crate::EsiStream::new`].
#[derive(Clone, Default)]
pub struct EsiOptions {
    pub(crate) vars: Option<Arc<dyn Variables>>,
    pub(crate) fetcher: Option<Arc<dyn Fetcher>>,
    pub(crate) process_include_response: Option<Arc<dyn IncludeResponseProcessor>>,
    pub(crate) handle_include_error: Option<Arc<dyn IncludeErrorHandler>>,
    pub(crate) esi_prefix: EsiPrefix,
}

impl EsiOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies an `IVariables` implementation. Defaults to built-ins
    /// derived from the stream's URL and headers.
    pub fn with_vars(mut self, vars: impl Variables + 'static) -> Self {
        self.vars = Some(Arc::new(vars));
        self
    }

    /// Supplies the fetcher used for `esi:include`. Required unless the
    /// `reqwest-fetcher` feature's default is acceptable.
    pub fn with_fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn with_process_include_response(mut self, processor: impl IncludeResponseProcessor + 'static) -> Self {
        self.process_include_response = Some(Arc::new(processor));
        self
    }

    pub fn with_handle_include_error(mut self, handler: impl IncludeErrorHandler + 'static) -> Self {
        self.handle_include_error = Some(Arc::new(handler));
        self
    }

    /// Sets a custom ESI namespace prefix. Must be a valid XML identifier.
    pub fn with_esi_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.esi_prefix = EsiPrefix::Named(prefix.into());
        self
    }

    /// Disables the implicit ESI namespace entirely: no tag matches.
    pub fn without_esi_prefix(mut self) -> Self {
        self.esi_prefix = EsiPrefix::Disabled;
        self
    }
}

impl std::fmt::Debug for EsiOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsiOptions")
            .field("vars", &self.vars.is_some())
            .field("fetcher", &self.fetcher.is_some())
            .field("process_include_response", &self.process_include_response.is_some())
            .field("handle_include_error", &self.handle_include_error.is_some())
            .field("esi_prefix", &self.esi_prefix)
            .finish()
    }
}
