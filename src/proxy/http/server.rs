use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Result;
use http::Method;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::debug;

use crate::logging::AccessLogBuilder;
use crate::proxy::AppContext;
use crate::proxy::handler::{RequestContext, Response};

use super::codec::{Http1RequestHead, read_http1_request_head};
use super::respond::{send_response, shutdown_stream};

/// Serves exactly one request on the connection, then closes it.
pub async fn handle_http<S>(stream: S, peer: SocketAddr, app: AppContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let client_timeout = app.settings.client_timeout();
    let mut reader = BufReader::new(stream);
    let start = Instant::now();

    let head = match read_http1_request_head(
        &mut reader,
        peer,
        client_timeout,
        client_timeout,
        app.settings.max_header_size,
    )
    .await
    {
        Ok(Some(head)) => head,
        Ok(None) => return Ok(()),
        Err(err) => {
            debug!(peer = %peer, error = %err, "rejecting malformed request");
            let response = Response::bad_request("malformed request");
            let mut stream = reader.into_inner();
            let log = AccessLogBuilder::new(peer);
            return finish(&mut stream, response, &app, log, start).await;
        }
    };

    let Http1RequestHead {
        ref method,
        ref headers,
        request_line_bytes,
        ..
    } = head;
    let path = head.path().to_string();
    let mut log = AccessLogBuilder::new(peer)
        .method(method.as_str())
        .path(path.clone())
        .bytes_in((request_line_bytes + headers.total_bytes()) as u64);
    if let Some(agent) = headers.user_agent() {
        log = log.user_agent(agent);
    }
    debug!(
        peer = %peer,
        method = %method,
        path = %path,
        version = ?head.version,
        "request received"
    );

    let response = if *method == Method::GET {
        crate::metrics::inc_inflight();
        let response = app
            .handler
            .handle(&RequestContext { peer, path })
            .await;
        crate::metrics::dec_inflight();
        response
    } else {
        Response::method_not_allowed()
    };

    let mut stream = reader.into_inner();
    finish(&mut stream, response, &app, log, start).await
}

async fn finish<S>(
    stream: &mut S,
    response: Response,
    app: &AppContext,
    mut log: AccessLogBuilder,
    start: Instant,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let timeout_dur = app.settings.client_timeout();
    let Response {
        status,
        headers,
        body,
        outcome,
        cache,
        attempts,
        error_reason,
        guard,
    } = response;

    log = log.status(status).outcome(outcome).attempts(attempts);
    if let Some(cache) = cache {
        log = log.cache(cache.as_str());
    }
    if let Some(reason) = error_reason {
        log = log.error_reason(reason);
    }

    let result = send_response(stream, status, &headers, body, timeout_dur).await;
    drop(guard);
    let written = match result {
        Ok(written) => written,
        Err(err) => {
            log.elapsed(start.elapsed()).log();
            return Err(err);
        }
    };
    let shutdown = shutdown_stream(stream, timeout_dur).await;
    log.bytes_out(written).elapsed(start.elapsed()).log();
    shutdown
}
