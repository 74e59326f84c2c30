use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use super::debounce::read_until_quiet;
use super::{HandshakeContext, HandshakeError, HandshakeReply};

pub fn request(host: &str) -> String {
    format!("GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", host)
}

/// Minimal GET; the response is complete once the peer goes quiet.
pub async fn handshake<S>(stream: &mut S, ctx: &HandshakeContext<'_>) -> Result<HandshakeReply, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request(ctx.target).as_bytes()).await?;
    let response = read_until_quiet(stream, ctx).await?;
    let status_line = String::from_utf8_lossy(&response)
        .lines()
        .next()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    Ok(HandshakeReply {
        completed_at: Instant::now(),
        detail: status_line,
    })
}
