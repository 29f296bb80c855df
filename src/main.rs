//! CrowdSec Agent CLI.

use anyhow::Result;
use clap::Parser;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zentinel_agent_crowdsec::{Config, CrowdsecAgent, GateRequest, Verdict};

#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-crowdsec")]
#[command(about = "CrowdSec agent for Zentinel - block client IPs with active CrowdSec decisions")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "crowdsec.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Decide a request from this client IP against the configured LAPI and
    /// print the verdict
    #[arg(long, value_name = "IP")]
    check: Option<IpAddr>,

    /// Request path used with --check
    #[arg(long, default_value = "/", requires = "check")]
    path: String,

    /// Host header used with --check
    #[arg(long, requires = "check")]
    host: Option<String>,

    /// Number of times to decide the request (shows cache hits with -L debug)
    #[arg(long, default_value_t = 1, requires = "check")]
    repeat: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let agent = CrowdsecAgent::new(config)?;

    let Some(peer) = args.check else {
        info!("No request to check; pass --check <IP> to query the LAPI");
        return Ok(());
    };

    let mut headers = HashMap::new();
    if let Some(host) = args.host {
        headers.insert("host".to_string(), vec![host]);
    }
    let request = GateRequest::from_peer(peer, "GET", &args.path, &headers, agent.ip_extraction());

    for _ in 0..args.repeat.max(1) {
        let verdict = agent.decide(&request).await;
        println!("{} {} {}", request.client_ip(), request.path(), host_action(&verdict));
    }

    Ok(())
}

/// What the host does with a verdict.
fn host_action(verdict: &Verdict) -> String {
    match (verdict.status(), verdict.location()) {
        (None, _) => "continue".to_string(),
        (Some(status), Some(location)) => format!("terminate {} location={}", status, location),
        (Some(status), None) => format!("terminate {}", status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_action() {
        assert_eq!(host_action(&Verdict::Allow), "continue");
        assert_eq!(host_action(&Verdict::Block { status: 429 }), "terminate 429");
        assert_eq!(host_action(&Verdict::advisory_error()), "terminate 500");
        assert_eq!(
            host_action(&Verdict::Redirect {
                status: 403,
                location: "https://example.com/blocked.html".to_string(),
            }),
            "terminate 403 location=https://example.com/blocked.html"
        );
    }
}
