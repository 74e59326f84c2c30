use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use super::debounce::{MAX_RESPONSE_BYTES, maybe_timeout_at};
use super::{HandshakeContext, HandshakeError, HandshakeReply};

/// Waits for the server's version banner; done at the first CRLF.
pub async fn handshake<S>(stream: &mut S, ctx: &HandshakeContext<'_>) -> Result<HandshakeReply, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut banner = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        // Only the wait for the very first byte is bounded here.
        let deadline = if banner.is_empty() {
            ctx.first_byte_deadline()
        } else {
            None
        };
        let n = match maybe_timeout_at(deadline, stream.read(&mut chunk)).await {
            None => return Err(HandshakeError::NoResponse(ctx.timings.handshake_timeout)),
            Some(read) => read?,
        };
        if n == 0 {
            return Err(if banner.is_empty() {
                HandshakeError::ClosedEarly
            } else {
                HandshakeError::Incomplete
            });
        }
        banner.extend_from_slice(&chunk[..n]);

        if banner.windows(2).any(|w| w == b"\r\n") {
            let completed_at = Instant::now();
            let text = String::from_utf8_lossy(&banner).trim_end().to_string();
            return Ok(HandshakeReply {
                completed_at,
                detail: Some(text),
            });
        }
        if banner.len() > MAX_RESPONSE_BYTES {
            return Err(HandshakeError::Oversized(MAX_RESPONSE_BYTES));
        }
    }
}
