use std::net::IpAddr;
use std::time::Instant;

use crate::pinger::PingReply;

#[derive(Debug, Clone)]
pub struct PingStatistics {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packets_lost: u32,
    /// Replies that carried a round-trip time. Only these feed the RTT figures.
    pub timed_replies: u32,
    pub min_time: f64,
    pub max_time: f64,
    pub total_time: f64,
    pub start_time: Instant,
}

impl PingStatistics {
    pub fn new() -> Self {
        Self {
            packets_sent: 0,
            packets_received: 0,
            packets_lost: 0,
            timed_replies: 0,
            min_time: f64::INFINITY,
            max_time: 0.0,
            total_time: 0.0,
            start_time: Instant::now(),
        }
    }

    pub fn record_sent(&mut self) {
        self.packets_sent += 1;
    }

    pub fn record_received(&mut self, time_ms: f64) {
        self.packets_received += 1;
        self.timed_replies += 1;
        self.total_time += time_ms;
        self.min_time = self.min_time.min(time_ms);
        self.max_time = self.max_time.max(time_ms);
    }

    /// A reply whose send time was not tracked.
    pub fn record_received_untimed(&mut self) {
        self.packets_received += 1;
    }

    pub fn record_lost(&mut self) {
        self.packets_lost += 1;
    }

    pub fn loss_percentage(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        (self.packets_lost as f64 / self.packets_sent as f64) * 100.0
    }

    pub fn average_time(&self) -> f64 {
        if self.timed_replies == 0 {
            return 0.0;
        }
        self.total_time / self.timed_replies as f64
    }

    pub fn format_header(&self, target: &str, resolved_ip: &IpAddr, payload_size: usize) -> String {
        if target == resolved_ip.to_string() {
            format!("PING {} with {} bytes of data:", target, payload_size)
        } else {
            format!("PING {} [{}] with {} bytes of data:", target, resolved_ip, payload_size)
        }
    }

    pub fn format_response(&self, reply: &PingReply, source: &IpAddr) -> String {
        let time_display = match reply.rtt {
            Some(rtt) => format!("time={}", format_time(rtt.as_secs_f64() * 1000.0)),
            None => "time=?".to_string(),
        };

        let mut line = format!(
            "Reply from {}: bytes={} icmp_seq={} {}",
            source,
            reply.payload_len(),
            reply.sequence,
            time_display
        );
        if let Some(ttl) = reply.ttl {
            line.push_str(&format!(" TTL={}", ttl));
        }
        line
    }

    pub fn format_summary(&self, target: &str) -> String {
        let mut summary = format!(
            "\n--- {} ping statistics ---\n    Packets: sent = {}, received = {}, lost = {} ({:.0}% loss), time {}ms\n",
            target,
            self.packets_sent,
            self.packets_received,
            self.packets_lost,
            self.loss_percentage(),
            self.start_time.elapsed().as_millis()
        );

        if self.timed_replies > 0 {
            summary.push_str(&format!(
                "Approximate round trip times in milli-seconds:\n    Minimum = {:.3}ms, Maximum = {:.3}ms, Average = {:.3}ms\n",
                self.min_time,
                self.max_time,
                self.average_time()
            ));
        }

        summary
    }
}

impl Default for PingStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a round-trip time for display
pub fn format_time(ms: f64) -> String {
    if ms < 1.0 {
        "<1ms".to_string()
    } else {
        format!("{:.0}ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_statistics_calculation() {
        let mut stats = PingStatistics::new();

        stats.record_sent();
        stats.record_received(10.5);

        stats.record_sent();
        stats.record_received(20.3);

        stats.record_sent();
        stats.record_lost();

        assert_eq!(stats.packets_sent, 3);
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.packets_lost, 1);
        assert!((stats.loss_percentage() - 33.333333333333336).abs() < 0.0001);
        assert_eq!(stats.average_time(), 15.4);
        assert_eq!(stats.min_time, 10.5);
        assert_eq!(stats.max_time, 20.3);
    }

    #[test]
    fn test_untimed_reply_skips_rtt_figures() {
        let mut stats = PingStatistics::new();
        stats.record_sent();
        stats.record_received(12.0);
        stats.record_sent();
        stats.record_received_untimed();

        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.loss_percentage(), 0.0);
        assert_eq!(stats.min_time, 12.0);
        assert_eq!(stats.average_time(), 12.0);
        assert!(stats.format_summary("host").contains("Minimum = 12.000ms"));

        let mut untimed_only = PingStatistics::new();
        untimed_only.record_sent();
        untimed_only.record_received_untimed();
        let summary = untimed_only.format_summary("host");
        assert!(summary.contains("received = 1"));
        assert!(!summary.contains("round trip"));
    }

    #[test]
    fn test_empty_statistics() {
        let stats = PingStatistics::default();
        assert_eq!(stats.loss_percentage(), 0.0);
        assert_eq!(stats.average_time(), 0.0);
        assert!(!stats.format_summary("host").contains("round trip"));
    }

    #[test]
    fn test_response_formatting() {
        let stats = PingStatistics::new();
        let reply = PingReply {
            sequence: 3,
            packet: vec![0u8; 8 + 32],
            rtt: Some(Duration::from_micros(15_700)),
            ttl: Some(64),
        };
        let source: IpAddr = "8.8.8.8".parse().unwrap();

        let formatted = stats.format_response(&reply, &source);
        assert_eq!(formatted, "Reply from 8.8.8.8: bytes=32 icmp_seq=3 time=16ms TTL=64");

        let untimed = PingReply {
            rtt: None,
            ttl: None,
            ..reply
        };
        assert_eq!(
            stats.format_response(&untimed, &source),
            "Reply from 8.8.8.8: bytes=32 icmp_seq=3 time=?"
        );
    }

    #[test]
    fn test_header_formatting() {
        let stats = PingStatistics::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(
            stats.format_header("127.0.0.1", &ip, 56),
            "PING 127.0.0.1 with 56 bytes of data:"
        );
        assert_eq!(
            stats.format_header("localhost", &ip, 56),
            "PING localhost [127.0.0.1] with 56 bytes of data:"
        );
    }

    #[test]
    fn test_summary_formatting() {
        let mut stats = PingStatistics::new();
        stats.record_sent();
        stats.record_received(10.0);
        stats.record_sent();
        stats.record_lost();

        let summary = stats.format_summary("8.8.8.8");
        assert!(summary.contains("--- 8.8.8.8 ping statistics ---"));
        assert!(summary.contains("sent = 2"));
        assert!(summary.contains("received = 1"));
        assert!(summary.contains("lost = 1"));
        assert!(summary.contains("50% loss"));
        assert!(summary.contains("Minimum = 10.000ms"));
    }

    #[test]
    fn test_time_formatting() {
        assert_eq!(format_time(0.5), "<1ms");
        assert_eq!(format_time(1.0), "1ms");
        assert_eq!(format_time(15.7), "16ms");
        assert_eq!(format_time(100.0), "100ms");
    }
}
