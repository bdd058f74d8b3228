//! Titorelli service adapters (reqwest).
//!
//! - [`TitorelliCas`]: CAS ban list lookups.
//! - [`TitorelliModel`]: spam classifier and totem grants.
//! - [`LivenessReporter`]: periodic "still alive" pings for the bot client.

use std::time::Duration;

use reqwest::{Response, Url};

use titus_core::{errors::Error, Result};

pub mod cas;
pub mod liveness;
pub mod model;

pub use cas::TitorelliCas;
pub use liveness::LivenessReporter;
pub use model::TitorelliModel;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(format!("failed to build titorelli http client: {e}")))
}

/// Resolve `path` against `origin`, keeping any path prefix of the origin.
fn endpoint(origin: &Url, path: &str) -> Result<Url> {
    let mut base = origin.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| Error::Config(format!("invalid titorelli endpoint {path}: {e}")))
}

fn request_err(service: &str, e: reqwest::Error) -> Error {
    Error::External(format!("{service} request error: {e}"))
}

/// Turn a non-2xx response into an error carrying a short body excerpt.
async fn ensure_success(service: &str, resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(Error::External(format!(
        "{service} failed: {status} {}",
        body.chars().take(200).collect::<String>()
    )))
}
