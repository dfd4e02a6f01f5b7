//! Minimal SNTP client (RFC 4330).

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::net::UdpSocket;

use agora_core::AgoraError;

const PACKET_LEN: usize = 48;
// Seconds between 1900-01-01 and 1970-01-01.
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// One clock measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Server clock minus local clock.
    pub offset: TimeDelta,
    /// Round-trip delay excluding server processing.
    pub delay: TimeDelta,
}

/// Encode `t` as a 64-bit NTP timestamp.
#[must_use]
pub fn to_ntp(t: DateTime<Utc>) -> [u8; 8] {
    let secs = (t.timestamp() + NTP_UNIX_OFFSET) as u32;
    let frac = ((u64::from(t.timestamp_subsec_nanos()) << 32) / 1_000_000_000) as u32;
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&secs.to_be_bytes());
    out[4..].copy_from_slice(&frac.to_be_bytes());
    out
}

/// Decode a 64-bit NTP timestamp.
#[must_use]
pub fn from_ntp(raw: &[u8]) -> Option<DateTime<Utc>> {
    let secs = u32::from_be_bytes(raw.get(..4)?.try_into().ok()?);
    let frac = u32::from_be_bytes(raw.get(4..8)?.try_into().ok()?);
    let nanos = ((u64::from(frac) * 1_000_000_000) >> 32) as u32;
    DateTime::<Utc>::from_timestamp(i64::from(secs) - NTP_UNIX_OFFSET, nanos)
}

/// Offset and delay from the four SNTP timestamps.
#[must_use]
pub fn compute(
    t1: DateTime<Utc>,
    t2: DateTime<Utc>,
    t3: DateTime<Utc>,
    t4: DateTime<Utc>,
) -> Sample {
    Sample {
        offset: ((t2 - t1) + (t3 - t4)) / 2,
        delay: (t4 - t1) - (t3 - t2),
    }
}

fn transient(server: &str, msg: impl Into<String>) -> AgoraError {
    AgoraError::transient(format!("ntp:{server}"), msg)
}

async fn resolve(server: &str) -> Result<SocketAddr, AgoraError> {
    let host = if server.rsplit_once(':').is_some_and(|(_, p)| p.parse::<u16>().is_ok()) {
        server.to_string()
    } else {
        format!("{server}:123")
    };
    tokio::net::lookup_host(host)
        .await
        .map_err(|e| transient(server, e.to_string()))?
        .next()
        .ok_or_else(|| transient(server, "no address"))
}

/// Query `server` once.
pub async fn query(server: &str, timeout: Duration) -> Result<Sample, AgoraError> {
    tokio::time::timeout(timeout, query_inner(server))
        .await
        .map_err(|_| AgoraError::timeout(format!("ntp query to {server}")))?
}

async fn query_inner(server: &str) -> Result<Sample, AgoraError> {
    let addr = resolve(server).await?;
    let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;

    let mut request = [0u8; PACKET_LEN];
    // LI = 0, VN = 4, Mode = 3 (client)
    request[0] = 0x23;
    let t1 = Utc::now();
    let stamp = to_ntp(t1);
    request[40..48].copy_from_slice(&stamp);
    socket.send(&request).await?;

    let mut buf = [0u8; 512];
    let n = socket.recv(&mut buf).await?;
    let t4 = Utc::now();
    if n < PACKET_LEN {
        return Err(transient(server, format!("short reply ({n} bytes)")));
    }
    let mode = buf[0] & 0x07;
    if mode != 4 && mode != 5 {
        return Err(transient(server, format!("unexpected mode {mode}")));
    }
    if buf[1] == 0 {
        return Err(transient(server, "kiss-of-death reply"));
    }
    if buf[24..32] != stamp {
        return Err(transient(server, "originate timestamp mismatch"));
    }
    let t2 = from_ntp(&buf[32..40]).ok_or_else(|| transient(server, "bad receive timestamp"))?;
    let t3 = from_ntp(&buf[40..48]).ok_or_else(|| transient(server, "bad transmit timestamp"))?;
    Ok(compute(t1, t2, t3, t4))
}

/// Answer one request read from `socket` with a clock skewed by `skew`.
///
/// Test helper standing in for a time server.
pub async fn respond_once(socket: &UdpSocket, skew: TimeDelta) -> Result<(), AgoraError> {
    let mut buf = [0u8; 512];
    let (n, peer) = socket.recv_from(&mut buf).await?;
    if n < PACKET_LEN {
        return Err(AgoraError::InvalidArg("short ntp request".into()));
    }
    let now = Utc::now() + skew;
    let mut reply = [0u8; PACKET_LEN];
    // LI = 0, VN = 4, Mode = 4 (server)
    reply[0] = 0x24;
    reply[1] = 1;
    reply[24..32].copy_from_slice(&buf[40..48]);
    reply[32..40].copy_from_slice(&to_ntp(now));
    reply[40..48].copy_from_slice(&to_ntp(now));
    socket.send_to(&reply, peer).await?;
    Ok(())
}
