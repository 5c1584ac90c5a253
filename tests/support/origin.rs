use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{Result, anyhow};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the mock origin answers GET requests for one artifact. HEAD always reports the full
/// length with 200.
#[derive(Clone, Debug)]
enum GetBehavior {
    /// Honors `Range: bytes=N-` with 206.
    Ranged,
    /// Always sends the full body with 200.
    IgnoreRange,
    /// The first `failures` GETs advertise the full remaining length but close after
    /// `truncate_after` body bytes. Later GETs behave like `Ranged`.
    Truncating {
        failures: usize,
        truncate_after: usize,
    },
    /// The first `failures` GETs answer with `status`. Later GETs behave like `Ranged`.
    FailingStatus { failures: usize, status: u16 },
    /// Answers ranged GETs with 206 but sends the whole body from byte 0.
    MisalignedRange,
}

#[derive(Clone, Debug)]
pub struct MockArtifact {
    body: Arc<Vec<u8>>,
    behavior: GetBehavior,
    /// Delay before the GET response head is written.
    delay: Option<StdDuration>,
}

impl MockArtifact {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: Arc::new(body.into()),
            behavior: GetBehavior::Ranged,
            delay: None,
        }
    }

    pub fn ignoring_range(mut self) -> Self {
        self.behavior = GetBehavior::IgnoreRange;
        self
    }

    pub fn truncating(mut self, failures: usize, truncate_after: usize) -> Self {
        self.behavior = GetBehavior::Truncating {
            failures,
            truncate_after,
        };
        self
    }

    pub fn failing_with(mut self, failures: usize, status: u16) -> Self {
        self.behavior = GetBehavior::FailingStatus { failures, status };
        self
    }

    pub fn misaligned_range(mut self) -> Self {
        self.behavior = GetBehavior::MisalignedRange;
        self
    }

    pub fn delayed(mut self, delay: StdDuration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub range: Option<String>,
}

#[derive(Default)]
struct OriginState {
    artifacts: Mutex<HashMap<String, MockArtifact>>,
    /// Paths answered with `302 Found` and the location they point to.
    redirects: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Scripted artifact repository. Paths are matched exactly, so the proxy's remote URL
/// construction is part of what the tests verify.
pub struct MockOrigin {
    addr: SocketAddr,
    state: Arc<OriginState>,
    handle: JoinHandle<()>,
}

impl MockOrigin {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(OriginState::default());
        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });
        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    /// Base URL the proxy should be configured with.
    pub fn base_url(&self) -> String {
        format!("http://{}/maven2", self.addr)
    }

    /// Publishes an artifact at `<base>/<relative>`.
    pub fn publish(&self, relative: &str, artifact: MockArtifact) {
        self.state
            .artifacts
            .lock()
            .unwrap()
            .insert(format!("/maven2/{relative}"), artifact);
    }

    /// Answers every request for `<base>/<relative>` with a redirect to `<base>/<target>`.
    pub fn redirect(&self, relative: &str, target: &str) {
        self.state.redirects.lock().unwrap().insert(
            format!("/maven2/{relative}"),
            format!("/maven2/{target}"),
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == method)
            .count()
    }

    /// `Range` headers of the GET requests, in arrival order.
    pub fn get_ranges(&self) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == "GET")
            .map(|request| request.range)
            .collect()
    }
}

impl Drop for MockOrigin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<OriginState>) -> Result<()> {
    let request = read_request(&mut stream).await?;
    state.requests.lock().unwrap().push(request.clone());
    let redirect = state.redirects.lock().unwrap().get(&request.path).cloned();
    if let Some(location) = redirect {
        let response = format!(
            "HTTP/1.1 302 Found\r\nLocation: {location}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await.ok();
        return Ok(());
    }
    let artifact = state.artifacts.lock().unwrap().get(&request.path).cloned();

    let Some(artifact) = artifact else {
        let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await.ok();
        return Ok(());
    };

    let total = artifact.body.len();
    if request.method == "HEAD" {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n"
        );
        stream.write_all(head.as_bytes()).await?;
        stream.shutdown().await.ok();
        return Ok(());
    }

    let get_index = state
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter(|seen| seen.method == "GET" && seen.path == request.path)
        .count()
        - 1;
    if let Some(delay) = artifact.delay {
        tokio::time::sleep(delay).await;
    }

    let offset = request
        .range
        .as_deref()
        .and_then(parse_range_start)
        .unwrap_or(0);

    let (truncate_after, behavior) = match artifact.behavior {
        GetBehavior::FailingStatus { failures, status } if get_index < failures => {
            let head = format!(
                "HTTP/1.1 {status} Upstream Trouble\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            stream.write_all(head.as_bytes()).await?;
            stream.shutdown().await.ok();
            return Ok(());
        }
        GetBehavior::Truncating {
            failures,
            truncate_after,
        } if get_index < failures => (Some(truncate_after), GetBehavior::Ranged),
        other => (None, other),
    };

    let (head, body) = match behavior {
        GetBehavior::IgnoreRange => (
            format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n"),
            &artifact.body[..],
        ),
        GetBehavior::MisalignedRange if request.range.is_some() => (
            format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 0-{}/{total}\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n",
                total - 1
            ),
            &artifact.body[..],
        ),
        _ if request.range.is_some() && offset >= total => {
            let head = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{total}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            stream.write_all(head.as_bytes()).await?;
            stream.shutdown().await.ok();
            return Ok(());
        }
        _ if request.range.is_some() => (
            format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {offset}-{}/{total}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                total - 1,
                total - offset
            ),
            &artifact.body[offset..],
        ),
        _ => (
            format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n"),
            &artifact.body[..],
        ),
    };

    stream.write_all(head.as_bytes()).await?;
    let body = match truncate_after {
        Some(limit) => &body[..limit.min(body.len())],
        None => body,
    };
    stream.write_all(body).await?;
    stream.flush().await?;
    stream.shutdown().await.ok();
    Ok(())
}

async fn read_request(stream: &mut TcpStream) -> Result<RecordedRequest> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    while !data.windows(4).any(|window| window == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(anyhow!("connection closed before request head"));
        }
        data.extend_from_slice(&buf[..n]);
    }

    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    let range = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .map(|(_, value)| value.trim().to_string());
    Ok(RecordedRequest {
        method,
        path,
        range,
    })
}

fn parse_range_start(value: &str) -> Option<usize> {
    value
        .strip_prefix("bytes=")?
        .strip_suffix('-')?
        .parse()
        .ok()
}
