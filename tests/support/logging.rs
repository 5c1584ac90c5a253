use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration as StdDuration;

use anyhow::{Result, anyhow};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

#[derive(Clone)]
struct CaptureWriter {
    buffer: SharedBuffer,
}

impl<'a> MakeWriter<'a> for CaptureWriter {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.buffer.lock().unwrap_or_else(|err| err.into_inner());
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

static BUFFER: OnceLock<SharedBuffer> = OnceLock::new();
static EXCLUSIVE: OnceLock<Arc<Semaphore>> = OnceLock::new();

/// Exclusive view of the process-wide tracing output. Tests that inspect logs take turns.
pub struct LogCapture {
    buffer: SharedBuffer,
    _permit: OwnedSemaphorePermit,
}

impl LogCapture {
    pub async fn start() -> Self {
        let permit = EXCLUSIVE
            .get_or_init(|| Arc::new(Semaphore::new(1)))
            .clone()
            .acquire_owned()
            .await
            .expect("log capture semaphore closed");
        let buffer = BUFFER
            .get_or_init(|| {
                let buffer: SharedBuffer = Arc::default();
                let subscriber = fmt::fmt()
                    .with_env_filter(EnvFilter::new("info"))
                    .with_ansi(false)
                    .compact()
                    .with_writer(CaptureWriter {
                        buffer: buffer.clone(),
                    })
                    .finish();
                let _ = tracing::subscriber::set_global_default(subscriber);
                buffer
            })
            .clone();
        buffer.lock().unwrap_or_else(|err| err.into_inner()).clear();
        Self {
            buffer,
            _permit: permit,
        }
    }

    pub fn text(&self) -> String {
        let guard = self.buffer.lock().unwrap_or_else(|err| err.into_inner());
        String::from_utf8_lossy(&guard).to_string()
    }

    /// Access-log lines written so far.
    pub fn access_lines(&self) -> Vec<String> {
        self.text()
            .lines()
            .filter(|line| line.contains("access_log"))
            .map(str::to_string)
            .collect()
    }

    /// Waits for an access-log line containing every needle. The access log is written after
    /// the client connection is closed, so callers poll for it.
    pub async fn wait_for_access(&self, needles: &[&str]) -> Result<String> {
        let deadline = Instant::now() + StdDuration::from_secs(2);
        loop {
            if let Some(line) = self
                .access_lines()
                .into_iter()
                .find(|line| needles.iter().all(|needle| line.contains(needle)))
            {
                return Ok(line);
            }
            if Instant::now() >= deadline {
                return Err(anyhow!(
                    "no access log line matching {needles:?}; captured:\n{}",
                    self.text()
                ));
            }
            sleep(StdDuration::from_millis(20)).await;
        }
    }
}
