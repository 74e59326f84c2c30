use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use super::debounce::read_until_quiet;
use super::{HandshakeContext, HandshakeError, HandshakeReply};

pub const QUERY: &[u8] = b"getinfo\0";

/// Sends the `getinfo` query and waits for the reply to go quiet.
pub async fn handshake<S>(stream: &mut S, ctx: &HandshakeContext<'_>) -> Result<HandshakeReply, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(QUERY).await?;
    let response = read_until_quiet(stream, ctx).await?;
    Ok(HandshakeReply {
        completed_at: Instant::now(),
        detail: summarize(&String::from_utf8_lossy(&response)),
    })
}

/// Pulls hostname and player counts out of an `infoResponse`
/// (`\key\value\key\value...`); otherwise returns the first line.
pub fn summarize(response: &str) -> Option<String> {
    let Some(idx) = response.find("infoResponse") else {
        return first_line(response);
    };
    let payload = response[idx + "infoResponse".len()..].trim_start_matches(['\r', '\n']);
    let mut fields = payload.trim_end().trim_start_matches('\\').split('\\');

    let mut hostname = None;
    let mut clients = None;
    let mut max_clients = None;
    while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
        match key {
            "hostname" => hostname = Some(value),
            "clients" => clients = Some(value),
            "sv_maxclients" => max_clients = Some(value),
            _ => {}
        }
    }

    match (hostname, clients, max_clients) {
        (Some(h), Some(c), Some(m)) => Some(format!("{h} ({c}/{m} players)")),
        (Some(h), _, _) => Some(h.to_string()),
        (None, Some(c), Some(m)) => Some(format!("{c}/{m} players")),
        _ => first_line(response),
    }
}

fn first_line(response: &str) -> Option<String> {
    response
        .lines()
        .map(|l| l.trim_matches(|c: char| c.is_whitespace() || c.is_control()))
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::debounce::tests::{assert_near, context};
    use tokio::io::AsyncReadExt;

    #[test]
    fn parses_info_response() {
        let raw = "\u{ff}\u{ff}\u{ff}\u{ff}infoResponse\n\\sv_maxclients\\48\\clients\\12\\hostname\\My Server\\gametype\\Freeroam";
        assert_eq!(summarize(raw).as_deref(), Some("My Server (12/48 players)"));
    }

    #[test]
    fn falls_back_to_first_line() {
        assert_eq!(summarize("\n  hello there \nmore").as_deref(), Some("hello there"));
        assert_eq!(summarize("   "), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_query_and_debounces() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let server_task = tokio::spawn(async move {
            let mut query = [0u8; 8];
            server.read_exact(&mut query).await.unwrap();
            server
                .write_all(b"infoResponse\n\\hostname\\Test\\clients\\1\\sv_maxclients\\32")
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            query
        });

        let ctx = context("127.0.0.1");
        let reply = handshake(&mut client, &ctx).await.unwrap();
        assert_eq!(reply.detail.as_deref(), Some("Test (1/32 players)"));
        assert_near(reply.completed_at - ctx.connected_at, 500);
        assert_eq!(&server_task.await.unwrap(), QUERY);
    }
}
