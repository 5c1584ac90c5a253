use std::time::Duration;

use anyhow::{Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::util::timeout_with_context;

const COPY_BUFFER_SIZE: usize = 16 * 1024;

pub async fn write_all_with_timeout<W>(
    writer: &mut W,
    data: &[u8],
    timeout_dur: Duration,
    context: &str,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    timeout_with_context(timeout_dur, writer.write_all(data), context).await
}

/// Copies exactly `len` bytes from `reader` to `writer`, applying `timeout_dur` to every
/// individual read and write. Fails if the reader runs dry before `len` bytes.
pub async fn copy_exact_with_timeout<R, W>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
    timeout_dur: Duration,
    context: &str,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;
    while copied < len {
        let want = (len - copied).min(buf.len() as u64) as usize;
        let read = timeout_with_context(timeout_dur, reader.read(&mut buf[..want]), context).await?;
        if read == 0 {
            bail!("source ended after {copied} of {len} bytes while {context}");
        }
        write_all_with_timeout(writer, &buf[..read], timeout_dur, context).await?;
        copied += read as u64;
    }
    timeout_with_context(timeout_dur, writer.flush(), context).await?;
    Ok(copied)
}
