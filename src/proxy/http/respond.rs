use std::time::Duration;

use anyhow::Result;
use http::{HeaderMap, StatusCode, header};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::io_util::{copy_exact_with_timeout, write_all_with_timeout};
use crate::proxy::handler::ResponseBody;
use crate::util::timeout_with_context;

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Writes a complete `Connection: close` response and returns the number of bytes sent.
pub async fn send_response<S>(
    stream: &mut S,
    status: StatusCode,
    headers: &HeaderMap,
    body: ResponseBody,
    timeout_dur: Duration,
) -> Result<u64>
where
    S: AsyncWrite + Unpin,
{
    let head = render_head(status, headers, body.len());
    write_all_with_timeout(stream, head.as_bytes(), timeout_dur, "writing response header")
        .await?;
    let mut written = head.len() as u64;

    match body {
        ResponseBody::Text(text) => {
            write_all_with_timeout(stream, text.as_bytes(), timeout_dur, "writing response body")
                .await?;
            written += text.len() as u64;
        }
        ResponseBody::File { mut file, len } => {
            written += copy_exact_with_timeout(
                &mut file,
                stream,
                len,
                timeout_dur,
                "writing artifact body",
            )
            .await?;
        }
    }
    timeout_with_context(timeout_dur, stream.flush(), "flushing response").await?;
    Ok(written)
}

fn render_head(status: StatusCode, headers: &HeaderMap, content_length: u64) -> String {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    let mut head = format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason);
    if !headers.contains_key(header::CONTENT_TYPE) {
        head.push_str("Content-Type: ");
        head.push_str(TEXT_CONTENT_TYPE);
        head.push_str("\r\n");
    }
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            head.push_str(name.as_str());
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
    }
    head.push_str(&format!(
        "Content-Length: {content_length}\r\nConnection: close\r\n\r\n"
    ));
    head
}

pub async fn shutdown_stream<S>(stream: &mut S, timeout_dur: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timeout_with_context(
        timeout_dur,
        stream.shutdown(),
        "shutting down client stream",
    )
    .await
}
