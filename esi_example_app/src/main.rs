//! A generic command-line filter: reads a document from stdin, resolves any
//! ESI markup against real HTTP fragments, and writes the transformed result
//! to stdout. Unlike the `demos/` examples this isn't tied to any particular
//! request/response model — it's the library used exactly as a host
//! framework would use it, minus the framework.

use std::io;

use bytes::Bytes;
use esi::{EsiOptions, EsiStream};
use futures_util::stream;
use http::HeaderMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

const READ_CHUNK_SIZE: usize = 8192;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder().filter(None, log::LevelFilter::Info).init();

    let base_url = std::env::var("ESI_BASE_URL").unwrap_or_else(|_| "http://localhost/".to_string());
    let url = Url::parse(&base_url)?;

    let stream = EsiStream::new(url, HeaderMap::new(), EsiOptions::new())?;
    let input = stdin_chunks();
    let mut output = stream.transform(input);

    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = futures_util::StreamExt::next(&mut output).await {
        stdout.write_all(&chunk?).await?;
    }
    stdout.flush().await?;
    Ok(())
}

/// Reads stdin in fixed-size chunks as a `Stream`, without pulling in
/// `tokio-util` for a `ReaderStream` the rest of the crate doesn't otherwise
/// need.
fn stdin_chunks() -> impl futures_core::Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream::unfold(tokio::io::stdin(), |mut stdin| async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        match stdin.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), stdin))
            }
            Err(err) => Some((Err(err), stdin)),
        }
    })
}
