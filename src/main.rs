mod cli;
mod utils;

use echoping::icmp::default_payload;
use echoping::stats::PingStatistics;
use echoping::{PingError, Pinger, PingerConfig};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    // Enable debug logging if RUST_LOG is set
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
    }

    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            utils::exit_with_error(&format!("Invalid arguments: {}", e), 1);
        }
    };

    if let Err(e) = utils::validate_ping_params(args.size, args.count, args.timeout, args.ttl, args.max_outstanding) {
        utils::exit_with_error(&e.to_string(), 1);
    }

    let config = PingerConfig {
        address_style: args.address_style(),
        timeout: Duration::from_millis(args.timeout.unwrap_or(1000) as u64),
        max_outstanding: args.max_outstanding,
        ttl: args.ttl,
    };

    let pinger = match Pinger::connect(&args.target, config).await {
        Ok(pinger) => pinger,
        Err(e @ PingError::SocketCreationFailed(_)) => {
            utils::exit_with_error(
                &format!("{}. Raw sockets need CAP_NET_RAW, or allow datagram ICMP via net.ipv4.ping_group_range", e),
                1,
            );
        }
        Err(e) => {
            utils::exit_with_error(&format!("Cannot reach '{}': {}", args.target, e), 1);
        }
    };

    let payload = args.size.map(|size| vec![0x61; size as usize]);
    let payload_size = payload.as_ref().map_or_else(|| default_payload(0).len(), Vec::len);
    let target_ip = pinger.address().ip();

    let mut stats = PingStatistics::new();
    println!("{}", stats.format_header(&args.target, &target_ip, payload_size));

    let mut shutdown_signal = utils::setup_signal_handler();
    let mut sent = 0u32;

    while utils::more_pings_due(sent, args.count) {
        sent = sent.saturating_add(1);
        stats.record_sent();

        let outcome = tokio::select! {
            _ = &mut shutdown_signal => {
                stats.record_lost();
                break;
            }
            outcome = pinger.ping(payload.clone()) => outcome,
        };

        match outcome {
            Ok(reply) => {
                match reply.rtt {
                    Some(rtt) => stats.record_received(rtt.as_secs_f64() * 1000.0),
                    None => stats.record_received_untimed(),
                }
                println!("{}", stats.format_response(&reply, &target_ip));
            }
            Err(e) => {
                stats.record_lost();
                if e.is_timeout() {
                    println!("Request timed out.");
                } else {
                    eprintln!("Error: {}", e);
                }
            }
        }

        if utils::more_pings_due(sent, args.count) {
            tokio::select! {
                _ = &mut shutdown_signal => break,
                _ = sleep(Duration::from_millis(args.interval)) => {}
            }
        }
    }

    pinger.stop();
    println!("{}", stats.format_summary(&args.target));
}
