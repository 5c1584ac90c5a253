use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail, ensure};
use http::{Method, Version};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tracing::debug;

use crate::util::timeout_with_context;

use super::headers::Http1HeaderAccumulator;
use super::line::{read_line_with_deadline, remaining_deadline};

pub(crate) struct Http1RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Http1HeaderAccumulator,
    pub request_line_bytes: usize,
}

impl Http1RequestHead {
    /// Path component of the request target. Absolute-form targets
    /// (`http://host/path`) are reduced to their path; the query is kept.
    pub fn path(&self) -> &str {
        request_path(&self.target)
    }
}

pub(crate) fn request_path(target: &str) -> &str {
    if target.starts_with('/') {
        return target;
    }
    match target.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|idx| &rest[idx..]).unwrap_or("/"),
        None => target,
    }
}

pub(crate) async fn read_http1_request_head<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    idle_timeout: Duration,
    header_timeout: Duration,
    max_header_bytes: usize,
) -> Result<Option<Http1RequestHead>>
where
    S: AsyncRead + Unpin,
{
    let available = match tokio::time::timeout(idle_timeout, reader.fill_buf()).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(err)) => {
            return Err(err).with_context(|| format!("waiting for request data from {peer}"));
        }
        Err(_) => return Ok(None),
    };
    if available.is_empty() {
        return Ok(None);
    }

    let deadline = Instant::now() + header_timeout;
    let Some((request_line, request_line_bytes)) =
        read_http1_request_line(reader, peer, deadline, max_header_bytes).await?
    else {
        debug!(peer = %peer, "connection closed before request line");
        return Ok(None);
    };
    if request_line.is_empty() {
        bail!("empty request line from {peer}");
    }

    let mut parts = request_line.split_whitespace();
    let method_str = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing method"))?;
    let target = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing target"))?;
    let version = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing version"))?;
    if parts.next().is_some() {
        bail!("malformed request line: unexpected data");
    }
    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => bail!("invalid HTTP version '{other}'"),
    };

    let method = Method::from_bytes(method_str.as_bytes())
        .with_context(|| format!("invalid method '{method_str}'"))?;
    let target = target.to_string();

    let remaining = max_header_bytes
        .checked_sub(request_line_bytes)
        .ok_or_else(|| anyhow!("request headers exceed configured limit"))?;
    ensure!(remaining > 0, "request headers exceed configured limit");
    let mut headers = Http1HeaderAccumulator::new(remaining);
    let mut header_line = String::new();
    loop {
        header_line.clear();
        let read =
            read_line_with_deadline(reader, &mut header_line, deadline, peer, remaining).await?;
        if read == 0 {
            break;
        }
        if !headers
            .push_line(&header_line)
            .with_context(|| format!("invalid header from {peer}"))?
        {
            break;
        }
    }

    Ok(Some(Http1RequestHead {
        method,
        target,
        version,
        headers,
        request_line_bytes,
    }))
}

async fn read_http1_request_line<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    deadline: Instant,
    max_len: usize,
) -> Result<Option<(String, usize)>>
where
    S: AsyncRead + Unpin,
{
    if max_len == 0 {
        bail!("request line limit must be greater than zero");
    }

    let mut line = Vec::new();
    let mut total = 0usize;
    let context = format!("reading request line from {peer}");

    loop {
        let remaining = remaining_deadline(deadline, &context)?;
        let available =
            timeout_with_context(remaining, reader.fill_buf(), context.as_str()).await?;

        if available.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            bail!("connection closed while reading request line from {peer}");
        }

        let newline_pos = available.iter().position(|byte| *byte == b'\n');
        let consume = newline_pos.map(|idx| idx + 1).unwrap_or(available.len());

        if total + consume > max_len {
            bail!("request line exceeds configured limit of {max_len} bytes for {peer}");
        }

        line.extend_from_slice(&available[..consume]);
        reader.consume(consume);
        total += consume;

        if newline_pos.is_some() {
            break;
        }
    }

    let mut string = String::from_utf8(line)
        .map_err(|_| anyhow!("request line for {peer} contained invalid bytes"))?;

    if !string.ends_with('\n') {
        bail!("request line for {peer} missing newline terminator");
    }
    string.pop();
    if string.ends_with('\r') {
        string.pop();
    }

    Ok(Some((string, total)))
}
