//! Wall clock used for the `rtc` field of telemetry, kept in step with an
//! SNTP server.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use log::{debug, info, warn};
use sntpc::{NtpContext, StdTimestampGen};
use time::{Duration, OffsetDateTime, UtcOffset};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::ClockError;
use crate::utils::format_rtc;

pub const NTP_PORT: u16 = 123;
const NTP_TIMEOUT: StdDuration = StdDuration::from_secs(2);

pub trait Clock {
    /// Current local time formatted as `YYYY-MM-DD_HH:MM:SS`.
    fn rtc(&self) -> String;

    /// Start a best-effort resync against the time source. Returns `false`
    /// when no resync could be started.
    fn synchronize(&mut self) -> bool;
}

/// System clock corrected by the last SNTP answer.
///
/// Queries run as tokio tasks. The correction is applied whenever an answer
/// arrives, so `synchronize` never blocks the loop that calls it.
pub struct SntpClock {
    server: String,
    port: u16,
    offset: UtcOffset,
    correction_us: Arc<AtomicI64>,
    pending: Option<JoinHandle<()>>,
}

impl SntpClock {
    pub fn new(server: impl Into<String>, offset: UtcOffset) -> Self {
        Self {
            server: server.into(),
            port: NTP_PORT,
            offset,
            correction_us: Arc::new(AtomicI64::new(0)),
            pending: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Offset applied to the system clock by the last successful query.
    pub fn correction(&self) -> Duration {
        Duration::microseconds(self.correction_us.load(Ordering::Relaxed))
    }

    pub fn now(&self) -> OffsetDateTime {
        (OffsetDateTime::now_utc() + self.correction()).to_offset(self.offset)
    }

    fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Clock for SntpClock {
    fn rtc(&self) -> String {
        format_rtc(&self.now())
    }

    fn synchronize(&mut self) -> bool {
        if self.is_pending() {
            debug!("SNTP query to {} still in flight", self.server);
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("No runtime for SNTP query to {}", self.server);
            return false;
        };

        let server = self.server.clone();
        let port = self.port;
        let correction_us = Arc::clone(&self.correction_us);
        self.pending = Some(runtime.spawn(async move {
            let outcome = tokio::time::timeout(NTP_TIMEOUT, query(&server, port))
                .await
                .unwrap_or(Err(ClockError::Timeout(NTP_TIMEOUT)));
            match outcome {
                Ok(offset_us) => {
                    correction_us.store(offset_us, Ordering::Relaxed);
                    info!("SNTP correction from {}: {} us", server, offset_us);
                }
                Err(e) => warn!("SNTP query to {} failed: {}", server, e),
            }
        }));
        true
    }
}

/// One SNTP exchange. Returns the local clock's offset in microseconds.
async fn query(server: &str, port: u16) -> Result<i64, ClockError> {
    let address = tokio::net::lookup_host((server, port))
        .await?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| ClockError::NoAddress(server.to_string()))?;
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    let context = NtpContext::new(StdTimestampGen::default());
    let result = sntpc::get_time(address, &socket, context)
        .await
        .map_err(|e| ClockError::Sntp(format!("{e:?}")))?;
    debug!("SNTP answer from {}", address);
    Ok(result.offset())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
    const NTP_UNIX_OFFSET_SECS: i64 = 2_208_988_800;

    /// Answers one request as a stratum 1 server whose clock is `skew_secs`
    /// ahead of ours.
    async fn skewed_server(socket: UdpSocket, skew_secs: i64) {
        let mut request = [0u8; 48];
        let Ok((len, peer)) = socket.recv_from(&mut request).await else {
            return;
        };
        assert_eq!(len, 48);
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let seconds = (now + skew_secs + NTP_UNIX_OFFSET_SECS) as u32;

        let mut reply = [0u8; 48];
        reply[0] = 0x24; // LI=0, VN=4, Mode=4 (server)
        reply[1] = 1;
        reply[16..20].copy_from_slice(&seconds.to_be_bytes());
        reply[24..32].copy_from_slice(&request[40..48]);
        reply[32..36].copy_from_slice(&seconds.to_be_bytes());
        reply[40..44].copy_from_slice(&seconds.to_be_bytes());
        socket.send_to(&reply, peer).await.unwrap();
    }

    #[tokio::test]
    async fn correction_follows_server_answer() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(skewed_server(server, 3_600));

        let mut clock = SntpClock::new("127.0.0.1", UtcOffset::UTC).with_port(port);
        assert!(clock.synchronize());
        for _ in 0..200 {
            if !clock.is_pending() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }

        let skew = clock.correction().whole_seconds();
        assert!((3_595..=3_605).contains(&skew), "correction {skew} s");
        let ahead = clock.now() - OffsetDateTime::now_utc();
        assert!(ahead > Duration::minutes(59));
    }

    #[tokio::test]
    async fn silent_server_does_not_block_the_caller() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let mut clock = SntpClock::new("127.0.0.1", UtcOffset::UTC).with_port(port);

        let started = std::time::Instant::now();
        assert!(clock.synchronize());
        assert!(started.elapsed() < StdDuration::from_millis(100));

        // The first query is still waiting; no second one is stacked on it
        assert!(!clock.synchronize());
        assert_eq!(clock.correction(), Duration::ZERO);
        drop(silent);
    }

    #[test]
    fn synchronize_without_runtime_is_refused() {
        let mut clock = SntpClock::new("127.0.0.1", UtcOffset::UTC);
        assert!(!clock.synchronize());
    }

    #[test]
    fn rtc_uses_configured_offset() {
        let clock = SntpClock::new("localhost", UtcOffset::from_hms(9, 0, 0).unwrap());
        assert_eq!(clock.now().offset(), UtcOffset::from_hms(9, 0, 0).unwrap());
        assert_eq!(clock.rtc().len(), "2024-01-01_00:00:00".len());
    }
}
