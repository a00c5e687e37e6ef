use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time;

use crate::hopper::codec::ByteReader;
use crate::hopper::config::{PreambleVersion, Route, RouteAction};
use crate::hopper::net;
use crate::hopper::packet::{self, Handshake};
use crate::hopper::preamble;
use crate::hopper::resolver::TargetResolver;
use crate::hopper::route::RouteTable;

/// Ceiling from accept to a fully parsed handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// State machine for one accepted client. Owns the client socket, and the
/// upstream socket once dialed; every exit path closes them by drop.
pub struct ConnectionHandler {
    id: u64,
    client: TcpStream,
    peer: SocketAddr,
    table: Arc<RouteTable>,
    resolver: Arc<TargetResolver>,
}

impl ConnectionHandler {
    pub fn new(
        id: u64,
        client: TcpStream,
        peer: SocketAddr,
        table: Arc<RouteTable>,
        resolver: Arc<TargetResolver>,
    ) -> Self {
        Self {
            id,
            client,
            peer,
            table,
            resolver,
        }
    }

    /// Runs the connection to completion. Errors end the connection, never
    /// the process or another connection.
    pub async fn run(mut self) {
        let handshake = {
            let mut reader = ByteReader::new(&mut self.client);
            match time::timeout(HANDSHAKE_TIMEOUT, packet::read_handshake(&mut reader)).await {
                Ok(Ok(handshake)) => handshake,
                Ok(Err(err)) => {
                    tracing::error!(
                        conn = self.id,
                        client = %self.peer,
                        err = %err,
                        "failed to read handshake packet from client"
                    );
                    return;
                }
                Err(_) => {
                    tracing::debug!(
                        conn = self.id,
                        client = %self.peer,
                        "wait for handshake packet timed out, closing connection"
                    );
                    return;
                }
            }
        };

        // The logical hostname routes; the vendor-mod tail after the first
        // NUL survives any rewrite.
        let (host, tail) = net::split_hostname_tail(handshake.hostname());
        let (host, tail) = (host.to_string(), tail.to_string());
        tracing::info!(
            conn = self.id,
            client = %self.peer,
            host = %host,
            port = handshake.port(),
            legacy = handshake.is_legacy(),
            "address in handshake packet"
        );

        let Some(route) = self.table.lookup(&host, handshake.port()) else {
            tracing::info!(
                conn = self.id,
                client = %self.peer,
                "no route for advertised address, closing connection"
            );
            return;
        };
        tracing::info!(conn = self.id, route = %route.name, "selected route");

        if route.action == RouteAction::Reject {
            self.send_disconnect(&handshake, route.reject_message_json.as_deref())
                .await;
            return;
        }

        let target = self.resolver.resolve(&route.target).await;
        tracing::info!(conn = self.id, target = %target, "dialing upstream");
        let started = time::Instant::now();
        let mut upstream = match dial(&target, route.connect_timeout).await {
            Ok(upstream) => upstream,
            Err(err) => {
                tracing::error!(conn = self.id, target = %target, err = %err, "upstream dial failed");
                self.send_disconnect(&handshake, route.dial_fail_message_json.as_deref())
                    .await;
                return;
            }
        };
        tracing::debug!(
            conn = self.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upstream dialed"
        );

        if route.preamble_version != PreambleVersion::Disabled
            && !self.write_preamble(&route, &mut upstream).await
        {
            return;
        }

        let mut handshake = handshake;
        if let Some(mimic) = &route.mimic {
            match net::split_host_port(mimic) {
                Some((mimic_host, mimic_port)) => {
                    handshake.set_hostname(format!("{mimic_host}{tail}"));
                    handshake.set_port(mimic_port);
                    tracing::info!(
                        conn = self.id,
                        host = %mimic_host,
                        port = mimic_port,
                        "rewrote address in handshake packet"
                    );
                }
                None => {
                    tracing::error!(
                        conn = self.id,
                        mimic = %mimic,
                        "invalid mimic address, forwarding handshake unchanged"
                    );
                }
            }
        }

        if let Err(err) = packet::write_handshake(&mut upstream, &handshake).await {
            tracing::error!(
                conn = self.id,
                err = %err,
                "failed to write handshake packet to upstream"
            );
            return;
        }

        tracing::info!(conn = self.id, "start forwarding");
        splice(self.id, self.client, upstream).await;
        tracing::info!(conn = self.id, "client connection end");
    }

    /// Best-effort disconnect. Only a modern handshake heading for the
    /// login state is eligible, and only when the route carries a message;
    /// everything else closes silently.
    async fn send_disconnect(&mut self, handshake: &Handshake, reason_json: Option<&str>) {
        let Some(reason) = reason_json else { return };
        if handshake.next_state() != Some(packet::NEXT_STATE_LOGIN) {
            return;
        }
        if let Err(err) = packet::write_disconnect(&mut self.client, reason).await {
            tracing::error!(
                conn = self.id,
                err = %err,
                "failed to send disconnect packet to client"
            );
            return;
        }
        let _ = self.client.shutdown().await;
        tracing::debug!(conn = self.id, "sent disconnect packet");
    }

    /// Writes the connection preamble ahead of any protocol bytes. Returns
    /// false when the connection must be aborted.
    async fn write_preamble(&mut self, route: &Route, upstream: &mut TcpStream) -> bool {
        let upstream_remote = match upstream.peer_addr() {
            Ok(addr) => addr,
            Err(err) => {
                tracing::error!(
                    conn = self.id,
                    err = %err,
                    "failed to resolve upstream endpoint, aborting connection"
                );
                return false;
            }
        };
        let header = match preamble::encode(route.preamble_version, self.peer, upstream_remote) {
            Ok(header) => header,
            Err(err) => {
                tracing::error!(conn = self.id, err = %err, "preamble not written, aborting connection");
                return false;
            }
        };
        if let Err(err) = upstream.write_all(&header).await {
            tracing::error!(
                conn = self.id,
                err = %err,
                "failed to write preamble to upstream, aborting connection"
            );
            return false;
        }
        true
    }
}

async fn dial(addr: &str, timeout: Duration) -> anyhow::Result<TcpStream> {
    let stream = time::timeout(timeout, TcpStream::connect(addr))
        .await
        .with_context(|| format!("dial timeout {addr}"))??;
    Ok(stream)
}

/// Transparent bidirectional copy. Each direction runs as its own task and
/// half-closes its destination when it ends, so the peer sees EOF promptly;
/// both directions are joined before returning, and dropping the halves
/// closes each socket exactly once.
async fn splice(id: u64, client: TcpStream, upstream: TcpStream) {
    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let c2u = tokio::spawn(copy_direction(
        id,
        "client -> upstream",
        client_read,
        upstream_write,
    ));
    let u2c = tokio::spawn(copy_direction(
        id,
        "client <- upstream",
        upstream_read,
        client_write,
    ));

    let _ = c2u.await;
    let _ = u2c.await;
}

async fn copy_direction(
    id: u64,
    direction: &'static str,
    mut read: OwnedReadHalf,
    mut write: OwnedWriteHalf,
) {
    match tokio::io::copy(&mut read, &mut write).await {
        Ok(n) => tracing::debug!(conn = id, direction, bytes = n, "forward end"),
        Err(err) => tracing::warn!(conn = id, direction, err = %err, "forward error"),
    }
    let _ = write.shutdown().await;
}
