#![allow(clippy::uninlined_format_args)]
//! Example: upgrade a submission connection with STARTTLS and list the
//! authentication mechanisms the server offers over TLS.
//!
//! ## Running
//!
//! ```bash
//! RUST_LOG=securesmtp=debug cargo run --package securesmtp --example starttls_probe -- smtp.gmail.com 587
//! ```
//!
//! Pass `--system-roots` as a third argument to trust the platform store
//! instead of the bundled roots.

use anyhow::Context as _;
use securesmtp::{ClientConfig, ReplyCode, SecureClient, TrustStoreSource};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("securesmtp=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().context("usage: starttls_probe <host> [port] [--system-roots]")?;
    let port = args
        .next()
        .map(|p| p.parse::<u16>())
        .transpose()
        .context("port must be a number")?
        .unwrap_or(securesmtp::connection::DEFAULT_PORT);
    let trust_store = if args.next().as_deref() == Some("--system-roots") {
        TrustStoreSource::System
    } else {
        TrustStoreSource::BuiltIn
    };

    let config = ClientConfig::builder(&host)
        .port(port)
        .trust_store(trust_store)
        .build();
    let mut client = SecureClient::new(config);

    println!("Connecting to {}:{}...", host, port);
    client.connect().await.context("plaintext prelude failed")?;
    println!("✓ STARTTLS accepted");

    if let Err(e) = client.start_tls_negotiation().await {
        println!("✗ TLS negotiation failed (status {}): {}", e.status_code(), e);
        return Err(e.into());
    }
    println!("✓ TLS session established");

    let code = client.get_server_secure_identification().await?;
    if code == ReplyCode::OK {
        println!("✓ Identified over TLS");
        for mechanism in client.auth_options().iter() {
            println!("  - {}", mechanism);
        }
    } else {
        println!("Server answered EHLO with {}", code);
    }

    client.cleanup().await;
    Ok(())
}
