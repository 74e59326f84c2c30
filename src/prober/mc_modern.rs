use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use super::{HandshakeContext, HandshakeError, HandshakeReply};
use crate::varint::{self, VarIntError};

/// 1.16.5
pub const PROTOCOL_VERSION: u32 = 754;
pub const NEXT_STATE_STATUS: u32 = 1;
const PACKET_ID: u8 = 0x00;
const MAX_PACKET_LEN: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerStatus {
    pub version: StatusVersion,
    #[serde(default)]
    pub players: Option<StatusPlayers>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusVersion {
    pub name: String,
    pub protocol: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusPlayers {
    pub max: i64,
    pub online: i64,
}

impl ServerStatus {
    pub fn summary(&self) -> String {
        let mut out = format!("{} (protocol {})", self.version.name, self.version.protocol);
        if let Some(players) = &self.players {
            out.push_str(&format!(", {}/{} players", players.online, players.max));
        }
        out
    }
}

/// Result of looking at the bytes received so far.
#[derive(Debug, PartialEq)]
pub enum StatusFrame {
    Incomplete,
    Status(ServerStatus),
    Unrecognized,
}

fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = varint::encode(body.len() as u32);
    out.extend_from_slice(body);
    out
}

pub fn handshake_packet(address: &str, port: u16) -> Vec<u8> {
    let mut body = vec![PACKET_ID];
    varint::write(&mut body, PROTOCOL_VERSION);
    varint::write(&mut body, address.len() as u32);
    body.extend_from_slice(address.as_bytes());
    body.extend_from_slice(&port.to_be_bytes());
    varint::write(&mut body, NEXT_STATE_STATUS);
    frame(&body)
}

pub fn status_request_packet() -> Vec<u8> {
    frame(&[PACKET_ID])
}

/// Tries to decode a status response from the front of `buf`. Only an
/// overlong VarInt is an error; anything else unexpected is `Unrecognized`.
pub fn decode_status(buf: &[u8]) -> Result<StatusFrame, VarIntError> {
    let (len, header) = match varint::decode(buf, 0) {
        Ok(v) => v,
        Err(VarIntError::UnexpectedEof) => return Ok(StatusFrame::Incomplete),
        Err(e) => return Err(e),
    };
    let len = len as usize;
    if len > MAX_PACKET_LEN {
        return Ok(StatusFrame::Unrecognized);
    }
    let Some(packet) = buf.get(header..header + len) else {
        return Ok(StatusFrame::Incomplete);
    };

    let (id, mut offset) = match varint::decode(packet, 0) {
        Ok(v) => v,
        Err(VarIntError::UnexpectedEof) => return Ok(StatusFrame::Unrecognized),
        Err(e) => return Err(e),
    };
    if id != PACKET_ID as u32 {
        debug!(id, "unexpected status packet id");
        return Ok(StatusFrame::Unrecognized);
    }

    let (json_len, json_header) = match varint::decode(packet, offset) {
        Ok(v) => v,
        Err(VarIntError::UnexpectedEof) => return Ok(StatusFrame::Unrecognized),
        Err(e) => return Err(e),
    };
    offset += json_header;
    let Some(json) = packet.get(offset..offset + json_len as usize) else {
        return Ok(StatusFrame::Unrecognized);
    };

    match serde_json::from_slice::<ServerStatus>(json) {
        Ok(status) => Ok(StatusFrame::Status(status)),
        Err(e) => {
            debug!("status json not understood: {}", e);
            Ok(StatusFrame::Unrecognized)
        }
    }
}

/// Handshake + status request. Completion is the first response chunk;
/// the status packet is then decoded if it finishes arriving within one
/// debounce window.
pub async fn handshake<S>(stream: &mut S, ctx: &HandshakeContext<'_>) -> Result<HandshakeReply, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&handshake_packet(ctx.target, ctx.port)).await?;
    stream.write_all(&status_request_packet()).await?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
        return Err(HandshakeError::ClosedEarly);
    }
    let completed_at = Instant::now();
    buf.extend_from_slice(&chunk[..n]);

    let grace = (completed_at + ctx.timings.debounce).min(ctx.deadline);
    let status = loop {
        match decode_status(&buf)? {
            StatusFrame::Status(status) => break Some(status),
            StatusFrame::Unrecognized => break None,
            StatusFrame::Incomplete => {}
        }
        match timeout_at(grace, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => break None,
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => {
                debug!("read after first status chunk failed: {}", e);
                break None;
            }
        }
    };

    Ok(HandshakeReply {
        completed_at,
        detail: status.map(|s| s.summary()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::debounce::tests::{assert_near, context};
    use std::time::Duration;

    const STATUS_JSON: &str = r#"{"version":{"name":"1.16.5","protocol":754},"players":{"max":20,"online":3,"sample":[]},"description":{"text":"A Minecraft Server"}}"#;

    fn status_response(json: &str) -> Vec<u8> {
        let mut body = vec![PACKET_ID];
        varint::write(&mut body, json.len() as u32);
        body.extend_from_slice(json.as_bytes());
        frame(&body)
    }

    #[test]
    fn handshake_packet_bytes() {
        let mut expected = vec![0x10, 0x00, 0xf2, 0x05, 0x09];
        expected.extend_from_slice(b"localhost");
        expected.extend_from_slice(&[0x63, 0xdd, 0x01]);
        assert_eq!(handshake_packet("localhost", 25565), expected);
    }

    #[test]
    fn status_request_bytes() {
        assert_eq!(status_request_packet(), vec![0x01, 0x00]);
    }

    #[test]
    fn decodes_complete_status() {
        let frame = decode_status(&status_response(STATUS_JSON)).unwrap();
        let StatusFrame::Status(status) = frame else {
            panic!("unexpected frame {frame:?}");
        };
        assert_eq!(status.summary(), "1.16.5 (protocol 754), 3/20 players");
    }

    #[test]
    fn partial_and_foreign_frames() {
        let full = status_response(STATUS_JSON);
        assert_eq!(decode_status(&full[..1]).unwrap(), StatusFrame::Incomplete);
        assert_eq!(decode_status(&full[..full.len() - 1]).unwrap(), StatusFrame::Incomplete);
        assert_eq!(decode_status(&[]).unwrap(), StatusFrame::Incomplete);
        assert_eq!(decode_status(&[0x02, 0x01, 0x00]).unwrap(), StatusFrame::Unrecognized);
        assert_eq!(decode_status(&status_response("not json")).unwrap(), StatusFrame::Unrecognized);
    }

    #[test]
    fn overlong_varint_is_an_error() {
        assert_eq!(decode_status(&[0xff; 6]), Err(VarIntError::TooLarge));
        assert_eq!(decode_status(&[0x06, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]), Err(VarIntError::TooLarge));
    }

    #[tokio::test(start_paused = true)]
    async fn latency_stops_at_first_chunk() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let expected = [handshake_packet("127.0.0.1", 0), status_request_packet()].concat();
            let mut request = vec![0u8; expected.len()];
            server.read_exact(&mut request).await.unwrap();
            assert_eq!(request, expected);

            let response = status_response(STATUS_JSON);
            let (head, tail) = response.split_at(10);
            tokio::time::sleep(Duration::from_millis(30)).await;
            server.write_all(head).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            server.write_all(tail).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let ctx = context("127.0.0.1");
        let reply = handshake(&mut client, &ctx).await.unwrap();
        assert_near(reply.completed_at - ctx.connected_at, 30);
        assert_eq!(reply.detail.as_deref(), Some("1.16.5 (protocol 754), 3/20 players"));
    }

    #[tokio::test(start_paused = true)]
    async fn any_response_counts() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut request = [0u8; 16];
            let _ = server.read(&mut request).await;
            server.write_all(b"\x05\x01junk").await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let ctx = context("127.0.0.1");
        let reply = handshake(&mut client, &ctx).await.unwrap();
        assert_eq!(reply.detail, None);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_length_fails_handshake() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut request = [0u8; 16];
            let _ = server.read(&mut request).await;
            server.write_all(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let ctx = context("127.0.0.1");
        let err = handshake(&mut client, &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "VarInt is too big");
    }
}
