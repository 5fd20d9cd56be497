// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{error::Error, net::SocketAddr, process::ExitCode, sync::Arc};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use promise_cards::{
    api::router,
    blockchain::{EnsNameService, EnsSettings},
    config::{AppConfig, LogFormat, DEFAULT_LOG_FILTER},
    protocol::{CheckpointKey, Collaborators, NameService, ObjectStore},
    providers::{DrandBeacon, PinataClient, PolybaseClient, RequestSigner},
    state::AppState,
    token::TokenMinter,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(LogFormat::Pretty);
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);
    config.warn_on_key_reuse();

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn Error>> {
    // Install the ring crypto provider for rustls before any TLS client or server exists
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let signer = RequestSigner::new(config.tenant_key.clone());
    info!(
        tenant = %signer.address(),
        namespace = %config.polybase_namespace,
        "Record store configured"
    );
    let records = PolybaseClient::new(
        config.polybase_url.clone(),
        config.polybase_namespace.clone(),
        signer,
    )?;
    let beacon = DrandBeacon::connect(&config.timelock_host, &config.timelock_hash).await?;

    let objects: Option<Arc<dyn ObjectStore>> = match &config.pinning {
        Some(pinning) => Some(Arc::new(PinataClient::new(
            pinning.url.clone(),
            pinning.jwt.as_str(),
        )?)),
        None => None,
    };

    let names: Option<Arc<dyn NameService>> = config.naming.as_ref().map(|naming| {
        let service = EnsNameService::new(
            EnsSettings {
                rpc_url: naming.rpc_url.clone(),
                main_domain: naming.main_domain.clone(),
                registry: naming.registry,
                resolver: naming.resolver,
            },
            naming.owner.clone(),
        );
        info!(
            domain = %naming.main_domain,
            owner = %service.owner_address(),
            "ENS naming enabled"
        );
        Arc::new(service) as Arc<dyn NameService>
    });

    let collaborators = Collaborators {
        records: Arc::new(records),
        beacon: Arc::new(beacon),
        objects,
        names,
        collection: config.user_collection.clone(),
    };
    let minter = TokenMinter::new(config.token_ttl, config.token_issuer.clone());
    let checkpoint_key = CheckpointKey::derive(&config.tenant_key.to_bytes())
        .map_err(|e| format!("checkpoint key derivation failed: {e}"))?;
    let app = router(AppState::new(collaborators, minter, checkpoint_key));

    let addr: SocketAddr = config.bind_address().parse()?;
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
            info!(%addr, "Promise cards server listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!(%addr, "Promise cards server listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then let in-flight requests drain.
async fn shutdown_signal(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, draining in-flight requests"),
        _ = terminate => info!("Received terminate signal, draining in-flight requests"),
    }

    handle.graceful_shutdown(None);
}
