#![warn(missing_docs)]

//! smbdfs-resolve: resolve UNC paths against a namespace described in JSON

use anyhow::Context;
use clap::Parser;
use smbdfs_client::exchange::SmbReferralExchange;
use smbdfs_client::namespace::NamespaceServer;
use smbdfs_client::session::Credentials;
use smbdfs_client::{DfsConfig, DfsResolver, SmbPath};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "smbdfs-resolve")]
#[command(about = "Resolve DFS paths against an in-memory namespace", long_about = None)]
struct Cli {
    /// Namespace description (domains, roots, links) as JSON
    namespace: std::path::PathBuf,

    /// UNC paths to resolve
    #[arg(required = true)]
    paths: Vec<String>,

    /// Resolver configuration as JSON
    #[arg(short, long, env = "SMBDFS_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Host the initial session is connected to
    #[arg(short, long, default_value = "localhost")]
    server: String,

    /// Learn trusted domains from the server before resolving
    #[arg(long)]
    bootstrap_domains: bool,

    /// Print resolver statistics as JSON at the end
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            DfsConfig::from_json(&json)?
        }
        None => DfsConfig::default(),
    };
    let json = std::fs::read_to_string(&cli.namespace)
        .with_context(|| format!("reading {}", cli.namespace.display()))?;
    let server = NamespaceServer::from_json(&json)?;

    tracing::info!(
        "smbdfs-resolve: {} domains, {} roots, {} links",
        server.definition().domains.len(),
        server.definition().roots.len(),
        server.definition().links.len()
    );

    let exchange = Arc::new(SmbReferralExchange::new(
        Arc::new(server.clone()),
        config.max_output_response,
    ));
    let resolver = DfsResolver::new(config, exchange);
    let session = server.session(&cli.server, Credentials::anonymous());

    if cli.bootstrap_domains {
        let learned = resolver.refresh_domains(session.as_ref()).await?;
        tracing::info!("smbdfs-resolve: learned {} domains", learned);
    }

    let mut failures = 0;
    for raw in &cli.paths {
        let path = match SmbPath::parse(raw) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("{}: {}", raw, e);
                failures += 1;
                continue;
            }
        };
        match resolver.resolve(session.as_ref(), &path).await {
            Ok(resolved) if resolved.is_dfs => {
                println!("{} -> {}", path.to_unc(), resolved.path.to_unc())
            }
            Ok(resolved) => println!("{} (not DFS)", resolved.path.to_unc()),
            Err(e) => {
                eprintln!("{}: {} [{}]", path.to_unc(), e, e.status());
                failures += 1;
            }
        }
    }

    if cli.stats {
        println!(
            "{}",
            serde_json::to_string_pretty(&resolver.stats().snapshot())?
        );
    }

    if failures > 0 {
        anyhow::bail!("{} of {} paths failed to resolve", failures, cli.paths.len());
    }
    Ok(())
}
