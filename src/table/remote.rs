use std::{io::Write as _, time::Duration};

use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to fetch remote location file ({url}): {error}")]
    Request { error: reqwest::Error, url: url::Url },
    #[error("failed to buffer remote location file ({url}): {error}")]
    Buffer { error: std::io::Error, url: url::Url },
}

/// Download a location file into a temporary file that lives as long as the handle.
pub fn fetch(url: &url::Url, table: &str, timeout: Duration) -> Result<NamedTempFile, FetchError> {
    let request = |error: reqwest::Error| FetchError::Request {
        error,
        url: url.clone(),
    };
    let buffer = |error: std::io::Error| FetchError::Buffer {
        error,
        url: url.clone(),
    };
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(request)?;
    let body = client
        .get(url.clone())
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.text())
        .map_err(request)?;
    let mut file = tempfile::Builder::new()
        .prefix(&format!("TTDT_URL_{table}-"))
        .tempfile()
        .map_err(buffer)?;
    file.write_all(body.as_bytes()).map_err(buffer)?;
    file.flush().map_err(buffer)?;
    Ok(file)
}
