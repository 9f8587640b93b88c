//! URL utility functions

use url::Url;

use crate::models::BackendAddress;

/// Build the full backend URL: `http://{host}:{port}{base_path}{path}`
pub fn backend_url(address: &BackendAddress, base_path: &str, path: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!("http://{}:{}{}{}", address.host, address.port, base_path, path))
}

/// Origin-form request target (path plus query) for a URL
pub fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
