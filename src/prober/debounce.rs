use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{Instant, sleep_until, timeout_at};

use super::{HandshakeContext, HandshakeError};

/// Bytes kept from a response; anything past this is read and dropped.
pub(crate) const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Awaits `fut`, giving up at `deadline` if there is one.
pub(crate) async fn maybe_timeout_at<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Reads until the peer has been quiet for one debounce window after its
/// last chunk. Fails if nothing arrives before the first-byte deadline.
pub(crate) async fn read_until_quiet<S>(
    stream: &mut S,
    ctx: &HandshakeContext<'_>,
) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut response = Vec::new();
    let mut chunk = [0u8; 4096];

    let n = match maybe_timeout_at(ctx.first_byte_deadline(), stream.read(&mut chunk)).await {
        None => return Err(HandshakeError::NoResponse(ctx.timings.handshake_timeout)),
        Some(read) => read?,
    };
    if n == 0 {
        return Err(HandshakeError::ClosedEarly);
    }
    keep(&mut response, &chunk[..n]);
    let mut quiet_at = Instant::now() + ctx.timings.debounce;

    loop {
        match timeout_at(quiet_at, stream.read(&mut chunk)).await {
            Err(_) => return Ok(response),
            Ok(Ok(0)) => {
                // Peer hung up; the quiet window still has to run out.
                sleep_until(quiet_at).await;
                return Ok(response);
            }
            Ok(Ok(n)) => {
                keep(&mut response, &chunk[..n]);
                quiet_at = Instant::now() + ctx.timings.debounce;
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}

fn keep(response: &mut Vec<u8>, data: &[u8]) {
    let room = MAX_RESPONSE_BYTES.saturating_sub(response.len());
    response.extend_from_slice(&data[..data.len().min(room)]);
}
