use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::error::{DispatchError, Result};
use crate::protocol::command::{parse_request, Reply, Request, ResultsHeader, RESULTS_PREFIX};

/// Size of a single read from the socket
pub const BUF_SIZE: usize = 1024;

const MAX_HEADER_BYTES: usize = 512;

/// Leading words of every command the dispatcher understands
const COMMAND_WORDS: [&[u8]; 4] = [b"status", b"register:", b"dispatch:", RESULTS_PREFIX];

/// Read one command from a connection within `timeout`.
///
/// Plain commands are taken from the first read, unless that read stops
/// inside a command word (`sta`, `res`, ...), in which case reading continues
/// until the word is complete, the peer closes, or the deadline passes. A
/// command split after its word must arrive in one piece. A `results` command
/// keeps reading until the header is complete and then until exactly `<len>`
/// payload bytes have arrived, however many reads that takes.
///
/// Input that never forms a command before the deadline is `InvalidCommand`.
/// A deadline hit with nothing read, or in the middle of a payload, is `Timeout`.
pub async fn read_request<R>(reader: &mut R, max_payload: usize, timeout: Duration) -> Result<Request>
where
    R: AsyncRead + Unpin,
{
    let deadline = Instant::now() + timeout;
    let mut chunk = [0u8; BUF_SIZE];
    let mut buf = Vec::with_capacity(BUF_SIZE);

    let n = read_chunk(reader, &mut chunk, deadline)
        .await?
        .ok_or(DispatchError::Timeout(timeout))?;
    if n == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before a command arrived",
        )
        .into());
    }
    buf.extend_from_slice(&chunk[..n]);

    while is_partial_command_word(&buf) {
        match read_chunk(reader, &mut chunk, deadline).await? {
            Some(0) | None => break,
            Some(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let start = leading_whitespace(&buf);
    if !buf[start..].starts_with(RESULTS_PREFIX) {
        let text = std::str::from_utf8(&buf).map_err(|_| {
            DispatchError::InvalidCommand(String::from_utf8_lossy(&buf).into_owned())
        })?;
        return parse_request(text);
    }
    buf.drain(..start);

    let header = loop {
        if let Some(header) = ResultsHeader::parse(&buf)? {
            break header;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(DispatchError::InvalidCommand(
                String::from_utf8_lossy(&buf[..MAX_HEADER_BYTES]).into_owned(),
            ));
        }
        match read_chunk(reader, &mut chunk, deadline).await? {
            Some(0) | None => {
                return Err(DispatchError::InvalidCommand(
                    String::from_utf8_lossy(&buf).into_owned(),
                ));
            }
            Some(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    if header.len > max_payload {
        return Err(DispatchError::PayloadTooLarge {
            size: header.len,
            limit: max_payload,
        });
    }

    let mut payload = buf.split_off(header.payload_start);
    payload.reserve(header.len.saturating_sub(payload.len()));
    while payload.len() < header.len {
        let n = read_chunk(reader, &mut chunk, deadline)
            .await?
            .ok_or(DispatchError::Timeout(timeout))?;
        if n == 0 {
            return Err(DispatchError::TruncatedPayload {
                expected: header.len,
                received: payload.len(),
            });
        }
        payload.extend_from_slice(&chunk[..n]);
    }
    payload.truncate(header.len);

    Ok(Request::Results {
        commit: header.commit,
        payload,
    })
}

/// One read bounded by `deadline`. None means the deadline passed first.
async fn read_chunk<R>(reader: &mut R, chunk: &mut [u8], deadline: Instant) -> Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout_at(deadline, reader.read(chunk)).await {
        Ok(read) => Ok(Some(read?)),
        Err(_) => Ok(None),
    }
}

fn leading_whitespace(buf: &[u8]) -> usize {
    buf.iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(buf.len())
}

/// True while the buffer stops partway through a command word.
/// Whitespace alone is not a partial command.
fn is_partial_command_word(buf: &[u8]) -> bool {
    let rest = &buf[leading_whitespace(buf)..];
    !rest.is_empty()
        && COMMAND_WORDS
            .iter()
            .any(|word| rest.len() < word.len() && word.starts_with(rest))
}

/// Write a reply and flush it.
pub async fn write_reply<W>(writer: &mut W, reply: Reply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(reply.as_str().as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
