use clap::{Arg, ArgAction, ArgMatches, Command};
use echoping::AddressStyle;

#[derive(Debug, Clone)]
pub struct PingArgs {
    pub target: String,
    pub continuous: bool,
    pub count: Option<u32>,
    pub size: Option<u32>,
    pub ttl: Option<u32>,
    pub timeout: Option<u32>,
    pub interval: u64,
    pub max_outstanding: usize,
    pub force_ipv4: bool,
    pub force_ipv6: bool,
}

impl Default for PingArgs {
    fn default() -> Self {
        Self {
            target: String::new(),
            continuous: false,
            count: Some(4),
            size: None, // default payload
            ttl: None,
            timeout: Some(1000),
            interval: 1000,
            max_outstanding: 64,
            force_ipv4: false,
            force_ipv6: false,
        }
    }
}

impl PingArgs {
    pub fn address_style(&self) -> AddressStyle {
        AddressStyle::from_flags(self.force_ipv4, self.force_ipv6)
    }
}

pub fn build_cli() -> Command {
    Command::new("echoping")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Send ICMP echo requests to a host and report round-trip times")
        .arg(
            Arg::new("target")
                .help("Target hostname or IP address")
                .required(true)
                .index(1)
        )
        .arg(
            Arg::new("continuous")
                .short('t')
                .help("Ping the specified host until stopped")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("count")
                .short('n')
                .help("Number of echo requests to send")
                .value_name("count")
                .value_parser(clap::value_parser!(u32))
        )
        .arg(
            Arg::new("size")
                .short('l')
                .help("Payload size in bytes (default: 56 byte generated filler)")
                .value_name("size")
                .value_parser(clap::value_parser!(u32))
        )
        .arg(
            Arg::new("ttl")
                .short('i')
                .help("Time To Live")
                .value_name("TTL")
                .value_parser(clap::value_parser!(u32))
        )
        .arg(
            Arg::new("timeout")
                .short('w')
                .help("Timeout in milliseconds to wait for each reply")
                .value_name("timeout")
                .value_parser(clap::value_parser!(u32))
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .help("Milliseconds between requests")
                .value_name("ms")
                .value_parser(clap::value_parser!(u64))
        )
        .arg(
            Arg::new("max_outstanding")
                .long("max-outstanding")
                .help("Maximum number of requests awaiting a reply at once")
                .value_name("count")
                .value_parser(clap::value_parser!(usize))
        )
        .arg(
            Arg::new("force_ipv4")
                .short('4')
                .help("Force using IPv4")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("force_ipv6")
                .short('6')
                .help("Force using IPv6")
                .action(ArgAction::SetTrue)
        )
}

pub fn parse_args() -> anyhow::Result<PingArgs> {
    args_from_matches(&build_cli().get_matches())
}

fn args_from_matches(matches: &ArgMatches) -> anyhow::Result<PingArgs> {
    let mut args = PingArgs::default();

    args.target = matches
        .get_one::<String>("target")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing target"))?;
    args.continuous = matches.get_flag("continuous");
    args.force_ipv4 = matches.get_flag("force_ipv4");
    args.force_ipv6 = matches.get_flag("force_ipv6");

    if let Some(count) = matches.get_one::<u32>("count") {
        args.count = Some(*count);
    }

    if let Some(size) = matches.get_one::<u32>("size") {
        args.size = Some(*size);
    }

    if let Some(ttl) = matches.get_one::<u32>("ttl") {
        args.ttl = Some(*ttl);
    }

    if let Some(timeout) = matches.get_one::<u32>("timeout") {
        args.timeout = Some(*timeout);
    }

    if let Some(interval) = matches.get_one::<u64>("interval") {
        args.interval = *interval;
    }

    if let Some(max_outstanding) = matches.get_one::<usize>("max_outstanding") {
        args.max_outstanding = *max_outstanding;
    }

    // Validation
    if args.force_ipv4 && args.force_ipv6 {
        return Err(anyhow::anyhow!("Cannot force both IPv4 and IPv6"));
    }

    if args.continuous {
        args.count = None; // Continuous mode overrides count
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> anyhow::Result<PingArgs> {
        args_from_matches(&build_cli().try_get_matches_from(argv)?)
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["echoping", "localhost"]).unwrap();
        assert_eq!(args.target, "localhost");
        assert_eq!(args.count, Some(4));
        assert_eq!(args.size, None);
        assert_eq!(args.address_style(), AddressStyle::Any);
    }

    #[test]
    fn test_options() {
        let args = parse(&["echoping", "-n", "2", "-l", "32", "-w", "500", "-i", "12", "-6", "::1"]).unwrap();
        assert_eq!(args.count, Some(2));
        assert_eq!(args.size, Some(32));
        assert_eq!(args.timeout, Some(500));
        assert_eq!(args.ttl, Some(12));
        assert_eq!(args.address_style(), AddressStyle::ForceV6);
    }

    #[test]
    fn test_continuous_overrides_count() {
        let args = parse(&["echoping", "-t", "-n", "3", "host"]).unwrap();
        assert_eq!(args.count, None);
    }

    #[test]
    fn test_conflicting_families() {
        assert!(parse(&["echoping", "-4", "-6", "host"]).is_err());
        assert!(parse(&["echoping"]).is_err());
    }
}
