//! Two-party startup rendezvous between the harness and a responder process.
//!
//! The worker (responder) binds its socket, writes `READY <port>` on its
//! stdout and waits for `GO` on its stdin. The supervisor (harness) waits for
//! the `READY` line and answers `GO`. Each side gives up after its timeout,
//! so a responder that never binds fails the run instead of hanging it.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const READY: &str = "READY";
const GO: &str = "GO";

#[derive(Debug, Error)]
pub enum BarrierError {
    #[error("other party did not arrive within {0:?}")]
    Timeout(Duration),

    #[error("other party closed the channel before arriving")]
    Closed,

    #[error("unexpected rendezvous line {0:?}")]
    Protocol(String),

    #[error("rendezvous I/O error: {0}")]
    Io(#[from] std::io::Error),
}

async fn read_line<R>(reader: &mut R) -> Result<String, BarrierError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(BarrierError::Closed);
    }
    Ok(line.trim().to_string())
}

async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), BarrierError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Worker side: announce the bound `port` and wait for the supervisor.
pub async fn arrive_worker<R, W>(
    reader: &mut R,
    writer: &mut W,
    port: u16,
    timeout: Duration,
) -> Result<(), BarrierError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let handshake = async {
        write_line(writer, &format!("{READY} {port}")).await?;
        match read_line(reader).await?.as_str() {
            GO => Ok(()),
            other => Err(BarrierError::Protocol(other.to_string())),
        }
    };
    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| BarrierError::Timeout(timeout))?
}

/// Supervisor side: wait for the worker's `READY` and release it.
///
/// Returns the port the worker reported.
pub async fn arrive_supervisor<R, W>(
    reader: &mut R,
    writer: &mut W,
    timeout: Duration,
) -> Result<u16, BarrierError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let handshake = async {
        let line = read_line(reader).await?;
        let port = line
            .strip_prefix(READY)
            .and_then(|rest| rest.trim().parse::<u16>().ok())
            .ok_or_else(|| BarrierError::Protocol(line.clone()))?;
        write_line(writer, GO).await?;
        Ok::<_, BarrierError>(port)
    };
    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| BarrierError::Timeout(timeout))?
}
