use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;

use crate::error::NarrationError;

/// Resolves `http(s)://`, `data:` and `file://`/plain-path references to raw bytes.
pub(super) fn load_bytes(http: &HttpClient, url: &str) -> Result<Vec<u8>, NarrationError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(NarrationError::media_load(url, "empty media reference"));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return fetch(http, trimmed);
    }
    if let Some(rest) = trimmed.strip_prefix("data:") {
        return decode_data_url(trimmed, rest);
    }
    let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    std::fs::read(Path::new(path)).map_err(|err| NarrationError::media_load(url, err.to_string()))
}

fn fetch(http: &HttpClient, url: &str) -> Result<Vec<u8>, NarrationError> {
    let response = http
        .get(url)
        .send()
        .map_err(|err| NarrationError::media_load(url, err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(NarrationError::media_load(
            url,
            format!("download failed ({})", status.as_u16()),
        ));
    }
    let bytes = response
        .bytes()
        .map_err(|err| NarrationError::media_load(url, err.to_string()))?;
    if bytes.is_empty() {
        return Err(NarrationError::media_load(url, "download returned no bytes"));
    }
    Ok(bytes.to_vec())
}

pub(super) fn decode_data_url(url: &str, rest: &str) -> Result<Vec<u8>, NarrationError> {
    let Some((header, payload)) = rest.split_once(',') else {
        return Err(NarrationError::media_load(url, "malformed data URL"));
    };
    if !header.ends_with(";base64") {
        return Err(NarrationError::media_load(
            url,
            "only base64 data URLs are supported",
        ));
    }
    BASE64
        .decode(payload.trim())
        .map_err(|err| NarrationError::media_load(url, err.to_string()))
}
