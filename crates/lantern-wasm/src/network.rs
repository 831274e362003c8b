//! Network primitives for the WASM environment.
//!
//! In the browser there are no sockets, only the Fetch API. These helpers
//! work from the main thread and from a Web Worker.
//!
//! Nothing fetched here is trusted. Beacon data is checked against sync
//! committee signatures and execution data against Merkle proofs by
//! lantern-core before it is used.

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Request, RequestInit, RequestMode, Response};

/// Errors from network operations.
#[derive(Debug)]
pub enum NetworkError {
    /// Failed to construct or send the HTTP request.
    RequestFailed(String),
    /// HTTP request returned a non-2xx status.
    HttpError(u16, String),
    /// Failed to read the response body.
    BodyReadFailed(String),
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::RequestFailed(e) => write!(f, "Request failed: {}", e),
            NetworkError::HttpError(status, msg) => {
                write!(f, "HTTP error {}: {}", status, msg)
            }
            NetworkError::BodyReadFailed(e) => write!(f, "Body read failed: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

/// `fetch` on whichever global scope we run in.
fn global_fetch(request: &Request) -> Result<js_sys::Promise, NetworkError> {
    if let Some(window) = web_sys::window() {
        return Ok(window.fetch_with_request(request));
    }
    let worker: web_sys::WorkerGlobalScope = js_sys::global()
        .dyn_into()
        .map_err(|_| NetworkError::RequestFailed("No window or worker global scope".to_string()))?;
    Ok(worker.fetch_with_request(request))
}

async fn send(url: &str, opts: &RequestInit) -> Result<String, NetworkError> {
    let request = Request::new_with_str_and_init(url, opts)
        .map_err(|e| NetworkError::RequestFailed(format!("{:?}", e)))?;

    let resp_value = JsFuture::from(global_fetch(&request)?)
        .await
        .map_err(|e| NetworkError::RequestFailed(format!("{:?}", e)))?;

    let resp: Response = resp_value
        .dyn_into()
        .map_err(|_| NetworkError::RequestFailed("Response is not a Response object".to_string()))?;

    if !resp.ok() {
        return Err(NetworkError::HttpError(resp.status(), resp.status_text()));
    }

    let text = JsFuture::from(
        resp.text()
            .map_err(|e| NetworkError::BodyReadFailed(format!("{:?}", e)))?,
    )
    .await
    .map_err(|e| NetworkError::BodyReadFailed(format!("{:?}", e)))?;

    text.as_string()
        .ok_or_else(|| NetworkError::BodyReadFailed("Response text is not a string".to_string()))
}

/// GET a URL and return the body as a string.
pub async fn fetch_text(url: &str) -> Result<String, NetworkError> {
    let mut opts = RequestInit::new();
    opts.method("GET");
    opts.mode(RequestMode::Cors);

    let headers = web_sys::Headers::new()
        .map_err(|e| NetworkError::RequestFailed(format!("{:?}", e)))?;
    headers
        .set("Accept", "application/json")
        .map_err(|e| NetworkError::RequestFailed(format!("{:?}", e)))?;
    opts.headers(&headers);

    send(url, &opts).await
}

/// POST a JSON body and return the response as a string.
///
/// Used for JSON-RPC requests to the execution node.
pub async fn post_json(url: &str, body: &str) -> Result<String, NetworkError> {
    let mut opts = RequestInit::new();
    opts.method("POST");
    opts.mode(RequestMode::Cors);
    opts.body(Some(&JsValue::from_str(body)));

    let headers = web_sys::Headers::new()
        .map_err(|e| NetworkError::RequestFailed(format!("{:?}", e)))?;
    headers
        .set("Content-Type", "application/json")
        .map_err(|e| NetworkError::RequestFailed(format!("{:?}", e)))?;
    opts.headers(&headers);

    send(url, &opts).await
}
