//! uproxy - Command-line interface for Universal Proxy
//!
//! Fetches targets through a running proxy, checks target URLs against the
//! address policy locally, and reports server health.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use reqwest::blocking::Client;
use reqwest::Method;

use universal_proxy::guard;
use universal_proxy::models::{ErrorBody, HealthResponse, HealthStatus};
use universal_proxy::rewrite::urls::encode_component;

/// uproxy - Fetch any URL through Universal Proxy
#[derive(Parser)]
#[command(name = "uproxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for Universal Proxy - SSRF-guarded forward proxy", long_about = None)]
struct Cli {
    /// Universal Proxy base URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    proxy_url: String,

    /// Route prefix the proxy is mounted under
    #[arg(long, default_value = "/proxy/")]
    prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a target URL through the proxy
    Fetch {
        /// Absolute target URL
        target: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request header as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body (or path to file with @ prefix)
        #[arg(short, long)]
        data: Option<String>,

        /// Write the body to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print status line and response headers
        #[arg(short, long)]
        include: bool,
    },

    /// Check a target URL against the address policy without fetching it
    Check {
        /// Absolute target URL
        target: String,
    },

    /// Get server health status
    Health,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            target,
            method,
            headers,
            data,
            output,
            include,
        } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("Invalid method: {}", method))?;

            let mut request = Client::new().request(
                method,
                proxied_url(&cli.proxy_url, &cli.prefix, &target),
            );
            for raw in &headers {
                let (name, value) = parse_header(raw)?;
                request = request.header(name, value);
            }
            if let Some(data) = data {
                // Read body from file if starts with @
                let body = match data.strip_prefix('@') {
                    Some(path) => fs::read(path)
                        .with_context(|| format!("Failed to read body file: {}", path))?,
                    None => data.into_bytes(),
                };
                request = request.body(body);
            }

            let response = request.send().context("Failed to send request")?;
            let status = response.status();

            if include {
                println!(
                    "{} {}",
                    "Status:".bright_cyan(),
                    if status.is_success() {
                        status.to_string().green()
                    } else {
                        status.to_string().red()
                    }
                );
                for (name, value) in response.headers() {
                    println!(
                        "{} {}",
                        format!("{}:", name).cyan(),
                        value.to_str().unwrap_or("<binary>")
                    );
                }
                println!();
            }

            let is_json = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with("application/json"));
            let body = response.bytes().context("Failed to read response body")?;

            if !status.is_success() && is_json {
                if let Ok(error) = serde_json::from_slice::<ErrorBody>(&body) {
                    anyhow::bail!("Proxy returned {}: {}", status, error.error);
                }
            }

            match output {
                Some(path) => {
                    fs::write(&path, &body)
                        .with_context(|| format!("Failed to write file: {}", path.display()))?;
                    println!(
                        "{} {} ({} bytes)",
                        "✓ Saved:".green(),
                        path.display(),
                        body.len()
                    );
                }
                None => {
                    std::io::stdout()
                        .write_all(&body)
                        .context("Failed to write body")?;
                }
            }
        }

        Commands::Check { target } => match guard::validate(&target) {
            Ok(url) => {
                println!("{} {}", "✓ Allowed:".green(), url);
                println!("{} {}", "  Scheme:".cyan(), url.scheme());
                println!("{} {}", "  Host:".cyan(), url.host());
                if let Some(port) = url.port() {
                    println!("{} {}", "  Port:".cyan(), port);
                }
            }
            Err(err) => {
                eprintln!("{} {}", "✗ Rejected:".red(), err);
                std::process::exit(1);
            }
        },

        Commands::Health => {
            let response = Client::new()
                .get(format!("{}/health", cli.proxy_url.trim_end_matches('/')))
                .send()
                .context("Failed to get health")?;

            if !response.status().is_success() {
                anyhow::bail!("Health check failed: {}", response.status());
            }

            let health: HealthResponse = response.json().context("Failed to parse response")?;

            println!("{}", "Universal Proxy Status".bright_cyan().bold());
            println!("{}", "=".repeat(40).bright_blue());
            println!(
                "{} {}",
                "Status:".cyan(),
                match health.status {
                    HealthStatus::Healthy => "healthy".green(),
                    HealthStatus::Degraded => "degraded".yellow(),
                }
            );
            println!("{} {}", "Version:".cyan(), health.version);
            println!("{} {}s", "Uptime:".cyan(), health.uptime_seconds);
        }
    }

    Ok(())
}

/// Proxy URL carrying the percent-encoded target
fn proxied_url(proxy_url: &str, prefix: &str, target: &str) -> String {
    format!(
        "{}{}{}",
        proxy_url.trim_end_matches('/'),
        prefix,
        encode_component(target)
    )
}

fn parse_header(raw: &str) -> Result<(&str, &str)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("Invalid header (expected \"Name: value\"): {}", raw))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Invalid header (empty name): {}", raw);
    }
    Ok((name, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxied_url_encodes_target() {
        assert_eq!(
            proxied_url("http://127.0.0.1:8080/", "/proxy/", "https://example.com/a?b=c"),
            "http://127.0.0.1:8080/proxy/https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc"
        );
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Accept: text/html").unwrap(),
            ("Accept", "text/html")
        );
        assert_eq!(
            parse_header("x-api-key:abc:def").unwrap(),
            ("x-api-key", "abc:def")
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_health_body_parses() {
        let health: HealthResponse = serde_json::from_str(
            r#"{"status":"healthy","version":"1.0.0","uptime_seconds":42}"#,
        )
        .unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.uptime_seconds, 42);
    }

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::try_parse_from([
            "uproxy",
            "fetch",
            "https://example.com/",
            "-X",
            "post",
            "-H",
            "Accept: text/html",
            "-H",
            "Content-Type: application/json",
            "-d",
            "{}",
            "-i",
        ])
        .unwrap();

        assert_eq!(cli.proxy_url, "http://127.0.0.1:8080");
        match cli.command {
            Commands::Fetch {
                target,
                method,
                headers,
                data,
                include,
                ..
            } => {
                assert_eq!(target, "https://example.com/");
                assert_eq!(method, "post");
                assert_eq!(headers.len(), 2);
                assert_eq!(data.as_deref(), Some("{}"));
                assert!(include);
            }
            _ => panic!("expected fetch"),
        }
    }
}
