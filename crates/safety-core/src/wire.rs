//! Length-prefixed JSON framing shared by the geofence client and the
//! reference geofence server: a big-endian `u32` byte count followed by
//! that many bytes of UTF-8 JSON.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Status,
    Waypoint { from: Position, to: Position },
    Speed { speed: f64 },
    Takeoff { alt: f64, lat: f64, lon: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Status {
        ok: bool,
    },
    Validity {
        valid: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Reply {
    pub fn valid(valid: bool, reason: Option<String>) -> Self {
        Reply::Validity { valid, reason }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Reply::Status { ok } => *ok,
            Reply::Validity { valid, .. } => *valid,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Reply::Validity { reason, .. } => reason.as_deref(),
            Reply::Status { .. } => None,
        }
    }
}

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

pub async fn read_frame<R, T>(reader: &mut R) -> std::io::Result<T>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let len = reader.read_u32().await?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    serde_json::from_slice(&buf).map_err(std::io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trips_through_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let request = Request::Waypoint {
            from: Position { lat: 1.0, lon: 2.0, alt: 3.0 },
            to: Position { lat: 4.0, lon: 5.0, alt: 6.0 },
        };
        write_frame(&mut client, &request).await.unwrap();
        let received: Request = read_frame(&mut server).await.unwrap();
        match received {
            Request::Waypoint { from, to } => {
                assert_eq!(from.lat, 1.0);
                assert_eq!(to.alt, 6.0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn status_reply_serializes_as_ok_field() {
        let reply = Reply::Status { ok: true };
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);
    }

    #[test]
    fn validity_reply_omits_reason_when_absent() {
        let reply = Reply::valid(true, None);
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"valid":true}"#);
    }
}
