use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::sync::watch;

use crate::hopper::{config, logging, net, resolver, route, server};

pub async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let cfg = config::load(&config_path)
        .with_context(|| format!("load config: {}", config_path.display()))?;

    let logrt = logging::init(cfg.debug)?;
    let _logrt_guard = logrt; // keep alive

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        source = %cfg.source,
        routes = cfg.routes.len(),
        "hopper starting"
    );

    let table = Arc::new(route::RouteTable::build(&cfg));
    table.dump();

    let resolver = Arc::new(resolver::TargetResolver::new(cfg.srv_lookup_timeout));

    let listen = net::normalize_bind_addr(&cfg.listen).into_owned();
    let opts = server::ServerOptions {
        table,
        resolver,
        proxy_protocol: cfg.proxy_protocol,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server =
        tokio::spawn(async move { server::serve(&listen, opts, shutdown_rx).await });

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("terminating by signal");
            let _ = shutdown_tx.send(true);
            server.await??;
        }
        res = &mut server => {
            // listener failed (bind error or terminal accept error)
            res??;
        }
    }

    tracing::info!("hopper stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
