use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::debug;

use super::debounce::read_until_quiet;
use super::{HandshakeContext, HandshakeError, HandshakeReply};

pub const PING: u8 = 0xfe;
const KICK: u8 = 0xff;

/// Server list data carried in a legacy kick packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyStatus {
    pub protocol: Option<String>,
    pub version: Option<String>,
    pub motd: String,
    pub online: String,
    pub max: String,
}

impl LegacyStatus {
    pub fn summary(&self) -> String {
        match (&self.version, &self.protocol) {
            (Some(version), Some(protocol)) => format!(
                "{} (protocol {}), {}/{} players, motd: {}",
                version, protocol, self.online, self.max, self.motd
            ),
            _ => format!("{}/{} players, motd: {}", self.online, self.max, self.motd),
        }
    }
}

/// Sends the one-byte legacy ping and waits for the reply to go quiet.
pub async fn handshake<S>(stream: &mut S, ctx: &HandshakeContext<'_>) -> Result<HandshakeReply, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[PING]).await?;
    let response = read_until_quiet(stream, ctx).await?;
    let completed_at = Instant::now();
    let status = parse_kick(&response);
    if status.is_none() {
        debug!(len = response.len(), "legacy reply is not a kick packet");
    }
    Ok(HandshakeReply {
        completed_at,
        detail: status.map(|s| s.summary()),
    })
}

/// `0xFF`, u16 BE length in UTF-16 units, then the UTF-16BE payload.
pub fn parse_kick(bytes: &[u8]) -> Option<LegacyStatus> {
    let (&id, rest) = bytes.split_first()?;
    if id != KICK || rest.len() < 2 {
        return None;
    }
    let units = u16::from_be_bytes([rest[0], rest[1]]) as usize;
    let body = rest.get(2..2 + units * 2)?;
    let utf16: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let text = String::from_utf16_lossy(&utf16);

    if let Some(fields) = text.strip_prefix("\u{a7}1\0") {
        let mut parts = fields.split('\0');
        let protocol = parts.next()?.to_string();
        let version = parts.next()?.to_string();
        let motd = parts.next()?.to_string();
        let online = parts.next()?.to_string();
        let max = parts.next()?.to_string();
        return Some(LegacyStatus {
            protocol: Some(protocol),
            version: Some(version),
            motd,
            online,
            max,
        });
    }

    let mut parts = text.rsplitn(3, '\u{a7}');
    let max = parts.next()?.to_string();
    let online = parts.next()?.to_string();
    let motd = parts.next()?.to_string();
    Some(LegacyStatus {
        protocol: None,
        version: None,
        motd,
        online,
        max,
    })
}
