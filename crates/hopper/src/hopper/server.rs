use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::hopper::connection::ConnectionHandler;
use crate::hopper::resolver::TargetResolver;
use crate::hopper::route::RouteTable;

pub struct ServerOptions {
    pub table: Arc<RouteTable>,
    pub resolver: Arc<TargetResolver>,
    /// Inbound PROXY header requirement; parsing it belongs to the
    /// accept-socket wrapper, the listener only announces the expectation.
    pub proxy_protocol: bool,
}

/// Single accept loop. Each connection runs as its own task; a shutdown
/// signal closes the listener while in-flight connections run to
/// completion.
pub async fn serve(
    listen_addr: &str,
    opts: ServerOptions,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let ln = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("bind tcp {listen_addr}"))?;
    tracing::info!(listen_addr = %listen_addr, "listening");
    if opts.proxy_protocol {
        tracing::info!("clients are required to send a proxy protocol header");
    }

    let mut next_id: u64 = 0;
    let mut conns = JoinSet::new();

    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    tracing::info!("closing connection listener");
                    break;
                }
            }
            res = ln.accept() => {
                match res {
                    Ok((conn, peer)) => {
                        next_id += 1;
                        tracing::info!(conn = next_id, client = %peer, "accepted connection");
                        let handler = ConnectionHandler::new(
                            next_id,
                            conn,
                            peer,
                            opts.table.clone(),
                            opts.resolver.clone(),
                        );
                        conns.spawn(handler.run());
                    }
                    Err(err) => {
                        tracing::error!(err = %err, "error accepting connection");
                        break;
                    }
                }
            }
        }
    }

    drop(ln);
    while conns.join_next().await.is_some() {}
    tracing::info!("all connections closed");
    Ok(())
}
