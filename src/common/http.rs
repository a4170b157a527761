//! networking module
//! function:
//! - fill the update service url template, values escaped as path segments
//! - get json with the http status code kept, the caller decides what a bad status means
//! - download a file into an already opened (temporary) file

use std::{fs::File, io::Write, time::Duration};
use serde_json::Value;
use super::error::{ErrorCode, UpdaterError};
use crate::{debug, warn};

const LOG_TAG: &str = "http";

// images can be large, downloads only bound the connect phase
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const PLACEHOLDERS: [&str; 3] = ["{model}", "{fw_version}", "{language}"];

/// substitute {model} {fw_version} {language} in the update service template,
/// each placeholder must be a whole path segment, values are escaped as path segments
pub fn fill_url_template(template: &str, model: &str, fw_version: &str, language: &str) -> Result<String, UpdaterError> {
    let invalid = |msg: String| UpdaterError::new(ErrorCode::PreconditionFailure, msg);
    // the parser stores the braces escaped
    let escaped: Vec<String> = PLACEHOLDERS.iter().map(|p| p.replace('{', "%7B").replace('}', "%7D")).collect();
    let values = [model, fw_version, language];

    let mut url = reqwest::Url::parse(template)
        .map_err(|e| invalid(format!("invalid update service url {}: {}", template, e)))?;
    let segments: Vec<String> = url
        .path_segments()
        .ok_or_else(|| invalid(format!("update service url has no path: {}", template)))?
        .map(|s| s.to_string())
        .collect();
    let first = match segments.iter().position(|s| escaped.contains(s)) {
        Some(first) => first,
        None => return Ok(url.to_string()),
    };

    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| invalid(format!("update service url has no path: {}", template)))?;
        for _ in first..segments.len() {
            path.pop();
        }
        for segment in &segments[first..] {
            match escaped.iter().position(|p| p == segment) {
                Some(i) => path.push(values[i]),
                None => path.push(segment),
            };
        }
    }
    Ok(url.to_string())
}

fn client(timeout: Option<Duration>) -> Result<reqwest::Client, UpdaterError> {
    let builder = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT);
    let builder = match timeout {
        Some(timeout) => builder.timeout(timeout),
        None => builder,
    };
    builder.build().map_err(|e| {
        UpdaterError::new(ErrorCode::UnexpectedFailure, format!("cannot build http client: {}", e))
    })
}

/// wrapper for get api, returns status code and json body
/// body is Value::Null when the status is not successful
/// the whole request, body included, must finish within timeout
pub async fn get_json(url: &str, timeout: Duration) -> Result<(u16, Value), UpdaterError> {
    let resp = client(Some(timeout))?.get(url).send().await.map_err(|e| {
        UpdaterError::new(ErrorCode::RemoteServiceFailure, format!("http get {} failed: {}", url, e))
    })?;
    let status = resp.status().as_u16();
    if !resp.status().is_success() {
        warn!(LOG_TAG, "http get {} returned status {}", url, status);
        return Ok((status, Value::Null));
    }
    let body: Value = resp.json().await.map_err(|e| {
        UpdaterError::new(ErrorCode::RemoteServiceFailure, format!("http get {} returned invalid json: {}", url, e))
    })?;
    Ok((status, body))
}

/// download url into the given file
pub async fn download_to_file(url: &str, out: &mut File) -> Result<u64, UpdaterError> {
    let acquisition = |msg: String| UpdaterError::new(ErrorCode::AcquisitionFailure, msg);

    let mut resp = client(None)
        .map_err(|e| acquisition(e.msg))?
        .get(url)
        .send()
        .await
        .map_err(|e| acquisition(format!("cannot download {}: {}", url, e)))?;
    if !resp.status().is_success() {
        return Err(acquisition(format!("cannot download {}: status {}", url, resp.status())));
    }

    let mut written: u64 = 0;
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| acquisition(format!("download {} interrupted: {}", url, e)))?
    {
        out.write_all(&chunk)
            .map_err(|e| acquisition(format!("cannot write downloaded data: {}", e)))?;
        written += chunk.len() as u64;
    }
    out.flush()
        .map_err(|e| acquisition(format!("cannot write downloaded data: {}", e)))?;
    debug!(LOG_TAG, "downloaded {} bytes from {}", written, url);
    Ok(written)
}

#[cfg(test)]
pub mod test {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// answer exactly one http request with the given status and body
    /// the join handle yields the request line that was received
    pub async fn serve_once(status: u16, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if n == 0 || buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let request = String::from_utf8_lossy(&buf).to_string();
            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request.lines().next().unwrap_or("").to_string()
        });
        (format!("http://{}", addr), handle)
    }

    /// accept one connection and never answer
    pub async fn stall_once() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_fill_url_template() {
        let url = fill_url_template(
            "http://h/api/{model}/{fw_version}/{language}",
            "Printer X",
            "1.2.3",
            "en",
        )
        .unwrap();
        assert_eq!(url, "http://h/api/Printer%20X/1.2.3/en");
    }

    #[test]
    fn test_fill_url_template_escapes_values() {
        let url = fill_url_template("http://h/{model}/{fw_version}/{language}", "a/b", "1.0?x", "é").unwrap();
        assert_eq!(url, "http://h/a%2Fb/1.0%3Fx/%C3%A9");
    }

    #[test]
    fn test_fill_url_template_invalid() {
        let err = fill_url_template("not a url/{model}", "a", "b", "c").unwrap_err();
        assert_eq!(err.code, ErrorCode::PreconditionFailure);
    }

    #[tokio::test]
    async fn test_get_json() {
        let (base, handle) = serve_once(200, r#"{"available": false}"#).await;
        let (status, body) = get_json(&format!("{}/check", base), Duration::from_secs(5)).await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body["available"], Value::Bool(false));
        assert_eq!(handle.await.unwrap(), "GET /check HTTP/1.1");
    }

    #[tokio::test]
    async fn test_get_json_bad_status() {
        let (base, _handle) = serve_once(503, "{}").await;
        let (status, body) = get_json(&base, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status, 503);
        assert!(body.is_null());
    }

    #[tokio::test]
    async fn test_get_json_stalled_server() {
        let (base, _handle) = stall_once().await;
        let started = std::time::Instant::now();
        let err = get_json(&base, Duration::from_millis(300)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RemoteServiceFailure);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_download_to_file() {
        let (base, _handle) = serve_once(200, ":00000001FF\n").await;
        let mut file = tempfile::tempfile().unwrap();
        let written = download_to_file(&format!("{}/fw.hex", base), &mut file).await.unwrap();
        assert_eq!(written, 12);
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let (base, _handle) = serve_once(404, "").await;
        let mut file = tempfile::tempfile().unwrap();
        let err = download_to_file(&base, &mut file).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AcquisitionFailure);
    }
}
