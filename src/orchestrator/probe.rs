use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub sent: u32,
    pub received: u32,
}

impl ProbeReport {
    /// At least one reply, and at least half of the requests answered
    pub fn passed(&self) -> bool {
        self.received > 0 && self.received >= self.sent / 2
    }
}

/// Checks that a network host answers before the test starts talking to it
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(
        &self,
        host: &str,
        count: u32,
        timeout: Duration,
    ) -> std::io::Result<ProbeReport>;
}

/// ICMP echo through the platform `ping` binary
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPing;

impl SystemPing {
    fn command(host: &str, count: u32, timeout: Duration) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("ping");

        #[cfg(windows)]
        cmd.args([
            "-n",
            &count.to_string(),
            "-w",
            &timeout.as_millis().max(1).to_string(),
            host,
        ]);

        #[cfg(not(windows))]
        cmd.args([
            "-c",
            &count.to_string(),
            "-W",
            &timeout.as_secs_f64().ceil().max(1.0).to_string(),
            host,
        ]);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ReachabilityProbe for SystemPing {
    async fn probe(
        &self,
        host: &str,
        count: u32,
        timeout: Duration,
    ) -> std::io::Result<ProbeReport> {
        log::info!("Pinging {} ({} requests)", host, count);

        let deadline = ping_deadline(timeout, count);
        let output = tokio::time::timeout(deadline, Self::command(host, count, timeout).output())
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("ping {} did not finish within {:?}", host, deadline),
                )
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = ProbeReport {
            sent: count,
            received: count_replies(&stdout),
        };
        log::info!("Ping {}: {}/{} replies", host, report.received, report.sent);
        Ok(report)
    }
}

/// Upper bound for a whole ping run; saturates instead of overflowing
fn ping_deadline(timeout: Duration, count: u32) -> Duration {
    timeout
        .checked_mul(count)
        .and_then(|total| total.checked_add(Duration::from_secs(5)))
        .unwrap_or(Duration::MAX)
}

/// Echo replies carry a TTL on every platform
pub fn count_replies(output: &str) -> u32 {
    output
        .lines()
        .filter(|line| line.to_ascii_lowercase().contains("ttl="))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_unix_and_windows_replies() {
        let unix = "PING 10.0.0.2 (10.0.0.2) 56(84) bytes of data.\n\
                    64 bytes from 10.0.0.2: icmp_seq=1 ttl=64 time=0.04 ms\n\
                    64 bytes from 10.0.0.2: icmp_seq=2 ttl=64 time=0.05 ms\n";
        assert_eq!(count_replies(unix), 2);

        let windows = "Reply from 10.0.0.2: bytes=32 time<1ms TTL=128\n\
                       Request timed out.\n";
        assert_eq!(count_replies(windows), 1);
    }

    #[test]
    fn half_of_requests_must_answer() {
        assert!(ProbeReport { sent: 4, received: 2 }.passed());
        assert!(!ProbeReport { sent: 4, received: 1 }.passed());
        assert!(ProbeReport { sent: 1, received: 1 }.passed());
        assert!(!ProbeReport { sent: 1, received: 0 }.passed());
    }

    #[test]
    fn deadline_saturates_on_huge_timeouts() {
        assert_eq!(ping_deadline(Duration::from_secs(1), 4), Duration::from_secs(9));
        assert_eq!(ping_deadline(Duration::from_secs_f64(1e19), 4), Duration::MAX);
        assert_eq!(ping_deadline(Duration::MAX, 1), Duration::MAX);
    }
}
