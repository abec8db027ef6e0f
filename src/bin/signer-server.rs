use std::sync::Arc;

use log::info;
use rusty_pdf_signer::audit::SqliteAuditStore;
use rusty_pdf_signer::config::SignerConfig;
use rusty_pdf_signer::server::Server;
use rusty_pdf_signer::signer::SigningService;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("Starting signer-server v{}", env!("CARGO_PKG_VERSION"));

    let config = SignerConfig::load()?;
    info!(
        "configuration loaded: {} document(s), output in {}",
        config.documents.len(),
        config.storage.signed_dir.display()
    );

    std::fs::create_dir_all(&config.storage.signed_dir)?;

    // The one audit store for this process; it closes when `service` drops.
    let store = Arc::new(SqliteAuditStore::open(&config.storage.audit_db)?);
    info!("audit store at {}", config.storage.audit_db.display());

    let service = Arc::new(SigningService::new(&config, store));
    let server = Server::start(
        &config.bind_address(),
        config.server.workers,
        config.server.max_body_bytes,
        service,
    )?;
    server.join();

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let format = fmt::format().with_target(true).with_thread_names(true).compact();

    // Use RUST_LOG if set, otherwise default to info level for our crates
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rusty_pdf_signer=info,signer_server=info"));

    // `init` also installs the `log` bridge, which is what the library logs through.
    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
