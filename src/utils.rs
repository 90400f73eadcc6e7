use std::process;

/// Print error message and exit with error code
pub fn exit_with_error(message: &str, code: i32) -> ! {
    eprintln!("echoping: {}", message);
    process::exit(code);
}

/// Validate ping parameters
pub fn validate_ping_params(
    size: Option<u32>,
    count: Option<u32>,
    timeout: Option<u32>,
    ttl: Option<u32>,
    max_outstanding: usize,
) -> anyhow::Result<()> {
    if let Some(size) = size {
        if size > 65500 {
            return Err(anyhow::anyhow!("Packet size too large, maximum is 65500 bytes"));
        }
    }

    if count == Some(0) {
        return Err(anyhow::anyhow!("Count must be greater than 0"));
    }

    if timeout == Some(0) {
        return Err(anyhow::anyhow!("Timeout must be greater than 0"));
    }

    if let Some(ttl) = ttl {
        if ttl == 0 || ttl > 255 {
            return Err(anyhow::anyhow!("TTL must be in the range 1-255"));
        }
    }

    if max_outstanding == 0 {
        return Err(anyhow::anyhow!("At least one outstanding request must be allowed"));
    }

    Ok(())
}

/// Whether another request is due after `sent` of them. `None` pings until
/// interrupted.
pub fn more_pings_due(sent: u32, count: Option<u32>) -> bool {
    count.is_none_or(|count| sent < count)
}

/// Handle Ctrl+C signal for graceful shutdown
pub fn setup_signal_handler() -> tokio::sync::oneshot::Receiver<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => {
                log::warn!("Failed to listen for Ctrl+C: {}", e);
                // Dropping tx would read as a shutdown request.
                std::future::pending::<()>().await;
            }
        }
    });

    rx
}
