//! The simplest possible host integration: take a response body, run it
//! through [`EsiStream`], print the result. Fragment fetches go out over a
//! real `reqwest` client (the `reqwest-fetcher` feature's default), hitting
//! whatever origin `ESI_BASE_URL` resolves to.

use esi::{EsiOptions, EsiStream};
use http::HeaderMap;
use url::Url;

#[tokio::main]
async fn main() {
    env_logger::builder().filter(None, log::LevelFilter::Trace).init();

    // Synthetic response body in place of a real backend call, e.g.
    // `client.get(origin_url).send().await?.text().await?`.
    let body = include_str!("index.html");

    let base_url = std::env::var("ESI_BASE_URL").unwrap_or_else(|_| "http://localhost/".to_string());
    let url = Url::parse(&base_url).expect("ESI_BASE_URL must be a valid URL");

    let stream = match EsiStream::new(url, HeaderMap::new(), EsiOptions::new()) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("invalid ESI configuration: {err}");
            std::process::exit(1);
        }
    };

    match stream.transform_to_string(bytes::Bytes::from_static(body.as_bytes())).await {
        Ok(rendered) => print!("{rendered}"),
        Err(err) => eprintln!("error processing ESI document: {err}"),
    }
}
