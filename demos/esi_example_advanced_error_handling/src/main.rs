//! Demonstrates the lower-level error-handling seams: a custom
//! [`IncludeErrorHandler`] substitutes a fallback fragment for any include
//! that exhausts its `src`/`alt` candidates, and output is streamed to
//! stdout chunk-by-chunk rather than buffered into a single string. A
//! document-level failure (not an include failure — e.g. malformed markup)
//! still falls through to the same fallback fragment.

use esi::{EsiOptions, EsiStream, IncludeErrorHandler, IncludeInfo};
use futures_util::stream::StreamExt;
use http::HeaderMap;
use log::{error, info};
use tokio::io::AsyncWriteExt;
use url::Url;

struct FallbackOnError;

impl IncludeErrorHandler for FallbackOnError {
    fn handle(&self, info: &IncludeInfo) -> Option<String> {
        info!("include failed for {}, substituting fallback fragment", info.url);
        Some(include_str!("error.html.fragment").to_string())
    }
}

#[tokio::main]
async fn main() {
    env_logger::builder().filter(None, log::LevelFilter::Trace).init();

    let body = include_str!("index.html");
    let base_url = std::env::var("ESI_BASE_URL").unwrap_or_else(|_| "http://localhost/".to_string());
    let url = Url::parse(&base_url).expect("ESI_BASE_URL must be a valid URL");

    let options = EsiOptions::new().with_handle_include_error(FallbackOnError);
    let stream = match EsiStream::new(url, HeaderMap::new(), options) {
        Ok(stream) => stream,
        Err(err) => {
            error!("invalid ESI configuration: {err}");
            std::process::exit(1);
        }
    };

    let input = futures_util::stream::once(async move {
        Ok::<_, std::io::Error>(bytes::Bytes::from_static(body.as_bytes()))
    });
    let mut output = stream.transform(input);

    let mut stdout = tokio::io::stdout();
    loop {
        match output.next().await {
            Some(Ok(chunk)) => {
                if stdout.write_all(&chunk).await.is_err() {
                    error!("client disconnected mid-stream");
                    break;
                }
            }
            Some(Err(err)) => {
                error!("error processing ESI document: {err}");
                let _ = stdout.write_all(include_bytes!("error.html.fragment")).await;
                break;
            }
            None => break,
        }
    }
    let _ = stdout.flush().await;
}
