//! HTTP response values produced by the [`ResponseFactory`](crate::factory::ResponseFactory).
//!
//! Four kinds exist, unified by [`HttpResponse`]:
//!
//! - [`Response`]: a plain text/HTML body
//! - [`JsonResponse`]: a JSON document plus its encoding options
//! - [`StreamedResponse`]: a producer callback run while the body is written
//! - [`BinaryFileResponse`]: a file on disk, optionally sent as a download
//!
//! Every kind can be written to any `AsyncWrite` with [`HttpResponse::send`].
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::debug;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

pub type Headers = HashMap<String, String>;

/// Look a header up by name, ignoring ASCII case.
pub fn find_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Set a header, replacing any existing entry whose name differs only in case.
pub fn set_header(headers: &mut Headers, name: &str, value: impl Into<String>) {
    headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value.into());
}

/// Set a header only when the caller has not supplied it in any casing.
pub fn default_header(headers: &mut Headers, name: &str, value: &str) {
    if find_header(headers, name).is_none() {
        headers.insert(name.to_string(), value.to_string());
    }
}

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Characters left alone by `rawurlencode`: alphanumerics and `-_.~`.
const RAW_URL_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A plain response with an in-memory body.
#[derive(Debug, Clone)]
pub struct Response {
    pub status_code: u16,
    pub headers: Headers,
    pub content: String,
}

impl Response {
    pub fn new(content: impl Into<String>, status_code: u16, headers: Headers) -> Self {
        Response {
            status_code,
            headers,
            content: content.into(),
        }
    }

    /// Construct a new HTTP 200 response with HTML/text body.
    pub fn ok(content: impl Into<String>) -> Self {
        Response::new(content, 200, Headers::new())
    }
}

/// Encoding options carried by a [`JsonResponse`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonOptions {
    /// Indent the document.
    pub pretty: bool,
    /// Emit `/` as `\/`.
    pub escape_slashes: bool,
}

impl JsonOptions {
    pub fn pretty() -> Self {
        JsonOptions {
            pretty: true,
            ..JsonOptions::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub status_code: u16,
    pub headers: Headers,
    pub data: Value,
    pub options: JsonOptions,
}

impl JsonResponse {
    pub fn new(data: Value, status_code: u16, mut headers: Headers, options: JsonOptions) -> Self {
        default_header(&mut headers, "Content-Type", JSON_CONTENT_TYPE);
        JsonResponse {
            status_code,
            headers,
            data,
            options,
        }
    }

    /// Encode `data` according to `options`.
    pub fn body(&self) -> Result<String> {
        let body = if self.options.pretty {
            serde_json::to_string_pretty(&self.data)?
        } else {
            serde_json::to_string(&self.data)?
        };
        // A '/' can only occur inside a JSON string, so escaping it is a plain substitution.
        if self.options.escape_slashes {
            Ok(body.replace('/', "\\/"))
        } else {
            Ok(body)
        }
    }
}

/// Handle given to a stream callback for emitting body chunks.
#[derive(Clone)]
pub struct StreamWriter {
    tx: mpsc::Sender<Vec<u8>>,
}

impl StreamWriter {
    /// Queue a chunk for the client. Fails once the receiving side is gone.
    pub async fn write(&self, chunk: impl Into<Vec<u8>>) -> io::Result<()> {
        self.tx
            .send(chunk.into())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response stream closed"))
    }
}

pub type StreamCallback = Box<dyn FnOnce(StreamWriter) -> BoxFuture<'static, ()> + Send>;

/// A response whose body is produced by a callback while it is being sent.
pub struct StreamedResponse {
    pub status_code: u16,
    pub headers: Headers,
    callback: Option<StreamCallback>,
}

impl StreamedResponse {
    pub fn new<F, Fut>(callback: F, status_code: u16, headers: Headers) -> Self
    where
        F: FnOnce(StreamWriter) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        StreamedResponse {
            status_code,
            headers,
            callback: Some(Box::new(move |writer| Box::pin(callback(writer)))),
        }
    }

    /// Whether the callback has not run yet.
    pub fn is_pending(&self) -> bool {
        self.callback.is_some()
    }

    async fn send<W: AsyncWrite + Unpin + Send>(mut self, writer: &mut W) -> Result<()> {
        writer
            .write_all(head(self.status_code, &self.headers, None).as_bytes())
            .await?;

        let Some(callback) = self.callback.take() else {
            writer.write_all(b"0\r\n\r\n").await?;
            return Ok(());
        };

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(16);
        let producer = callback(StreamWriter { tx });
        // `rx` is owned here so a failed client write closes the channel and
        // the producer's next `write` fails instead of blocking.
        let forward = async move {
            while let Some(chunk) = rx.recv().await {
                if chunk.is_empty() {
                    continue;
                }
                writer
                    .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await?;
                writer.write_all(&chunk).await?;
                writer.write_all(b"\r\n").await?;
            }
            writer.write_all(b"0\r\n\r\n").await?;
            writer.flush().await
        };
        let ((), written) = futures::future::join(producer, forward).await;
        written?;
        Ok(())
    }
}

impl fmt::Debug for StreamedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamedResponse")
            .field("status_code", &self.status_code)
            .field("headers", &self.headers)
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Attachment,
    Inline,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Attachment => f.write_str("attachment"),
            Disposition::Inline => f.write_str("inline"),
        }
    }
}

/// A response that sends a file from disk.
#[derive(Debug, Clone)]
pub struct BinaryFileResponse {
    pub status_code: u16,
    pub headers: Headers,
    file: PathBuf,
}

impl BinaryFileResponse {
    /// Build a response for `file`, which must exist and be a regular file.
    pub fn new(
        file: impl Into<PathBuf>,
        status_code: u16,
        headers: Headers,
        auto_content_type: bool,
        disposition: Option<Disposition>,
    ) -> Result<Self> {
        let file = file.into();
        if !file.is_file() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("file `{}` does not exist", file.display()),
            )));
        }

        let mut response = BinaryFileResponse {
            status_code,
            headers,
            file,
        };
        if auto_content_type {
            let mime = mime_guess::from_path(&response.file).first_or_octet_stream();
            set_header(&mut response.headers, "Content-Type", mime.to_string());
        }
        if let Some(disposition) = disposition {
            response.set_content_disposition(disposition, "", "")?;
        }
        Ok(response)
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Set the `Content-Disposition` header.
    ///
    /// An empty `filename` means the file's own name. An empty `fallback` is
    /// derived from `filename` by replacing non-printable-ASCII characters and
    /// `%` with `_`.
    pub fn set_content_disposition(
        &mut self,
        disposition: Disposition,
        filename: &str,
        fallback: &str,
    ) -> Result<()> {
        let filename = if filename.is_empty() {
            self.file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            filename.to_string()
        };

        let fallback = if !fallback.is_empty() {
            fallback.to_string()
        } else if !is_printable_ascii(&filename) || filename.contains('%') {
            filename
                .chars()
                .map(|c| {
                    if c == '%' || !(' '..='~').contains(&c) {
                        '_'
                    } else {
                        c
                    }
                })
                .collect()
        } else {
            filename.clone()
        };

        let header = make_disposition(disposition, &filename, &fallback)?;
        set_header(&mut self.headers, "Content-Disposition", header);
        Ok(())
    }

    /// Set `ETag` to the SHA-256 digest of the file.
    pub async fn set_auto_etag(&mut self) -> Result<()> {
        let contents = tokio::fs::read(&self.file).await?;
        let digest = Sha256::digest(&contents);
        set_header(&mut self.headers, "ETag", format!("\"{:x}\"", digest));
        Ok(())
    }

    /// Set `Last-Modified` from the file's modification time.
    pub async fn set_auto_last_modified(&mut self) -> Result<()> {
        let modified = tokio::fs::metadata(&self.file).await?.modified()?;
        let modified: DateTime<Utc> = modified.into();
        set_header(
            &mut self.headers,
            "Last-Modified",
            modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
        Ok(())
    }
}

fn is_printable_ascii(value: &str) -> bool {
    value.chars().all(|c| (' '..='~').contains(&c))
}

/// Build a `Content-Disposition` value with an ASCII `filename` and, when the
/// real name differs, an RFC 6266 `filename*` parameter.
pub fn make_disposition(disposition: Disposition, filename: &str, fallback: &str) -> Result<String> {
    if !is_printable_ascii(fallback) {
        return Err(Error::InvalidDisposition(
            "the filename fallback must only contain ASCII characters".into(),
        ));
    }
    if fallback.contains('%') {
        return Err(Error::InvalidDisposition(
            "the filename fallback cannot contain the \"%\" character".into(),
        ));
    }
    if [filename, fallback]
        .iter()
        .any(|name| name.contains('/') || name.contains('\\'))
    {
        return Err(Error::InvalidDisposition(
            "the filename and the fallback cannot contain the \"/\" and \"\\\" characters".into(),
        ));
    }

    let mut header = format!("{}; filename={}", disposition, quote(fallback));
    if filename != fallback {
        header.push_str(&format!(
            "; filename*=utf-8''{}",
            utf8_percent_encode(filename, RAW_URL_ENCODE)
        ));
    }
    Ok(header)
}

/// Quote a header parameter unless it is a valid HTTP token.
fn quote(value: &str) -> String {
    let is_token = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*.^_`|~-".contains(c));
    if is_token {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Any response the factory can produce.
#[derive(Debug)]
pub enum HttpResponse {
    Basic(Response),
    Json(JsonResponse),
    Streamed(StreamedResponse),
    File(BinaryFileResponse),
}

impl HttpResponse {
    pub fn status_code(&self) -> u16 {
        match self {
            HttpResponse::Basic(r) => r.status_code,
            HttpResponse::Json(r) => r.status_code,
            HttpResponse::Streamed(r) => r.status_code,
            HttpResponse::File(r) => r.status_code,
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            HttpResponse::Basic(r) => &r.headers,
            HttpResponse::Json(r) => &r.headers,
            HttpResponse::Streamed(r) => &r.headers,
            HttpResponse::File(r) => &r.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            HttpResponse::Basic(r) => &mut r.headers,
            HttpResponse::Json(r) => &mut r.headers,
            HttpResponse::Streamed(r) => &mut r.headers,
            HttpResponse::File(r) => &mut r.headers,
        }
    }

    /// Header value by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(self.headers(), name)
    }

    /// Builder-style header setter. Replaces a header of the same name in any casing.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        set_header(self.headers_mut(), name, value);
        self
    }

    /// Serialize the response onto `writer`.
    ///
    /// Streamed responses run their callback here and use chunked transfer
    /// encoding; everything else is written with a `Content-Length`.
    pub async fn send<W: AsyncWrite + Unpin + Send>(self, writer: &mut W) -> Result<()> {
        debug!("Sending {} response", self.status_code());
        match self {
            HttpResponse::Basic(r) => {
                write_full(writer, r.status_code, &r.headers, r.content.as_bytes()).await
            }
            HttpResponse::Json(r) => {
                let body = r.body()?;
                write_full(writer, r.status_code, &r.headers, body.as_bytes()).await
            }
            HttpResponse::File(r) => {
                let body = tokio::fs::read(&r.file).await?;
                write_full(writer, r.status_code, &r.headers, &body).await
            }
            HttpResponse::Streamed(r) => r.send(writer).await,
        }
    }
}

impl From<Response> for HttpResponse {
    fn from(response: Response) -> Self {
        HttpResponse::Basic(response)
    }
}

impl From<JsonResponse> for HttpResponse {
    fn from(response: JsonResponse) -> Self {
        HttpResponse::Json(response)
    }
}

impl From<StreamedResponse> for HttpResponse {
    fn from(response: StreamedResponse) -> Self {
        HttpResponse::Streamed(response)
    }
}

impl From<BinaryFileResponse> for HttpResponse {
    fn from(response: BinaryFileResponse) -> Self {
        HttpResponse::File(response)
    }
}

/// Status line and headers. Headers are written in name order.
///
/// Framing headers are always computed here; caller-supplied
/// `Content-Length` and `Transfer-Encoding` are dropped.
fn head(status_code: u16, headers: &Headers, content_length: Option<usize>) -> String {
    let mut head = format!("HTTP/1.1 {} {}\r\n", status_code, status_text(status_code));
    match content_length {
        Some(len) => head.push_str(&format!("Content-Length: {}\r\n", len)),
        None => head.push_str("Transfer-Encoding: chunked\r\n"),
    }
    let mut names: Vec<&String> = headers
        .keys()
        .filter(|name| {
            !name.eq_ignore_ascii_case("Content-Length")
                && !name.eq_ignore_ascii_case("Transfer-Encoding")
        })
        .collect();
    names.sort();
    for name in names {
        head.push_str(&format!("{}: {}\r\n", name, headers[name]));
    }
    head.push_str("\r\n");
    head
}

async fn write_full<W: AsyncWrite + Unpin + Send>(
    writer: &mut W,
    status_code: u16,
    headers: &Headers,
    body: &[u8],
) -> Result<()> {
    writer
        .write_all(head(status_code, headers, Some(body.len())).as_bytes())
        .await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Maps status codes to HTTP status text for responses.
pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
