//! The host fetch contract: `esi:include` is resolved through a
//! [`Fetcher`], which the host implements over whatever HTTP client it
//! already uses. A `reqwest`-backed default is available behind the
//! `reqwest-fetcher` feature, for the demo binaries and doctests only;
//! library consumers are expected to supply their own.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::error::{EsiError, Result};

/// A request for an ESI fragment.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

/// A fetched fragment response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Reads the body as UTF-8 text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec()).map_err(EsiError::from)
    }
}

/// Performs the GET that backs `esi:include`. Implemented by the host over
/// its own HTTP client; the crate ships only the optional `reqwest` default.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, request: FetchRequest) -> BoxFuture<'a, Result<FetchResponse>>;
}

/// A [`Fetcher`] built from a plain async closure, for hosts that don't want
/// to name a type.
pub struct FnFetcher<F>(pub F);

impl<F> Fetcher for FnFetcher<F>
where
    F: for<'a> Fn(FetchRequest) -> BoxFuture<'a, Result<FetchResponse>> + Send + Sync,
{
    fn fetch<'a>(&'a self, request: FetchRequest) -> BoxFuture<'a, Result<FetchResponse>> {
        (self.0)(request)
    }
}

/// The fallback used when a stream is constructed with no `Fetcher` and the
/// `reqwest-fetcher` feature is off: every `esi:include` fails immediately
/// rather than panicking.
pub(crate) struct NoFetcher;

impl Fetcher for NoFetcher {
    fn fetch<'a>(&'a self, _request: FetchRequest) -> BoxFuture<'a, Result<FetchResponse>> {
        Box::pin(async {
            Err(EsiError::Fetch(Box::from(
                "no Fetcher configured: supply one via EsiOptions::with_fetcher, or enable the reqwest-fetcher feature",
            )))
        })
    }
}

#[cfg(feature = "reqwest-fetcher")]
mod reqwest_fetcher {
    use super::*;
    use futures_util::FutureExt;

    /// A [`Fetcher`] backed by a shared [`reqwest::Client`].
    #[derive(Clone, Default)]
    pub struct ReqwestFetcher {
        client: reqwest::Client,
    }

    impl ReqwestFetcher {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    impl Fetcher for ReqwestFetcher {
        fn fetch<'a>(&'a self, request: FetchRequest) -> BoxFuture<'a, Result<FetchResponse>> {
            async move {
                let mut builder = self.client.request(request.method, request.url.as_str());
                builder = builder.headers(request.headers);
                let resp = builder
                    .send()
                    .await
                    .map_err(|e| EsiError::Fetch(Box::new(e)))?;
                let status = resp.status();
                let headers = resp.headers().clone();
                let body = resp
                    .bytes()
                    .await
                    .map_err(|e| EsiError::Fetch(Box::new(e)))?;
                Ok(FetchResponse { status, headers, body })
            }
            .boxed()
        }
    }
}

#[cfg(feature = "reqwest-fetcher")]
pub use reqwest_fetcher::ReqwestFetcher;
