//! TCP transport: newline-delimited JSON frames.
//!
//! One listener accepts connections from any peer and forwards each line to
//! the inbox. Outgoing frames go through a per-peer writer task that connects
//! lazily and reconnects with capped exponential backoff.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use trustflow_core::config::DispatchConfig;
use trustflow_core::id::PartyId;

use super::{Inbox, Transport};
use crate::error::TransportError;

pub struct TcpTransport {
    local: PartyId,
    writers: BTreeMap<PartyId, UnboundedSender<Vec<u8>>>,
}

impl TcpTransport {
    /// Bind the local listener from the address book and spawn one writer per peer.
    ///
    /// All tasks stop when `shutdown` fires.
    pub async fn start(
        cfg: &DispatchConfig,
        shutdown: CancellationToken,
    ) -> Result<(Arc<Self>, Inbox), TransportError> {
        let me = cfg
            .address_of(cfg.local)
            .ok_or(TransportError::UnknownParty(cfg.local))?;
        let listener = TcpListener::bind(me.socket_addr())
            .await
            .map_err(|e| TransportError::Io(format!("bind {}: {e}", me.socket_addr())))?;
        debug!(party = %cfg.local, addr = %me.socket_addr(), "listening for completions");

        let (inbox_tx, inbox) = unbounded_channel();
        tokio::spawn(accept_loop(listener, inbox_tx, shutdown.clone()));

        let mut writers = BTreeMap::new();
        for peer in cfg.parties.iter().filter(|p| p.id != cfg.local) {
            let (tx, rx) = unbounded_channel();
            writers.insert(peer.id, tx);
            tokio::spawn(writer_loop(
                peer.id,
                peer.socket_addr(),
                rx,
                cfg.clone(),
                shutdown.clone(),
            ));
        }

        Ok((
            Arc::new(Self {
                local: cfg.local,
                writers,
            }),
            inbox,
        ))
    }

    pub fn local(&self) -> PartyId {
        self.local
    }
}

impl Transport for TcpTransport {
    fn send(&self, to: PartyId, frame: Vec<u8>) -> Result<(), TransportError> {
        let writer = self.writers.get(&to).ok_or(TransportError::UnknownParty(to))?;
        writer.send(frame).map_err(|_| TransportError::Closed(to))
    }
}

async fn accept_loop(
    listener: TcpListener,
    inbox: UnboundedSender<Vec<u8>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "peer connected");
                    tokio::spawn(read_loop(stream, inbox.clone(), shutdown.clone()));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
}

async fn read_loop(stream: TcpStream, inbox: UnboundedSender<Vec<u8>>, shutdown: CancellationToken) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if inbox.send(line.into_bytes()).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "dropping connection after read error");
                    break;
                }
            },
        }
    }
}

async fn writer_loop(
    peer: PartyId,
    addr: String,
    mut frames: UnboundedReceiver<Vec<u8>>,
    cfg: DispatchConfig,
    shutdown: CancellationToken,
) {
    let mut stream: Option<TcpStream> = None;
    loop {
        let mut frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = frames.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
        };
        frame.push(b'\n');

        let mut attempt = 0;
        loop {
            if stream.is_none() {
                match TcpStream::connect(&addr).await {
                    Ok(s) => stream = Some(s),
                    Err(e) => {
                        if attempt >= cfg.connect_max_retries {
                            error!(%peer, %addr, error = %e, "giving up on frame");
                            break;
                        }
                        let backoff = cfg.connect_backoff(attempt);
                        debug!(%peer, attempt, ?backoff, "connect failed, retrying");
                        attempt += 1;
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        continue;
                    }
                }
            }

            let Some(s) = stream.as_mut() else { continue };
            match s.write_all(&frame).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(%peer, error = %e, "write failed, reconnecting");
                    stream = None;
                    if attempt >= cfg.connect_max_retries {
                        error!(%peer, "giving up on frame");
                        break;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use trustflow_core::config::PartyAddr;

    use super::*;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn config(local: u64, ports: &[(u64, u16)]) -> DispatchConfig {
        DispatchConfig {
            local: PartyId::new(local),
            parties: ports
                .iter()
                .map(|(id, port)| PartyAddr {
                    id: PartyId::new(*id),
                    host: "127.0.0.1".into(),
                    port: *port,
                })
                .collect(),
            connect_initial_backoff_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn frames_cross_the_socket_line_by_line() {
        let ports = [(1, free_port()), (2, free_port())];
        let shutdown = CancellationToken::new();
        let (t1, _in1) = TcpTransport::start(&config(1, &ports), shutdown.clone())
            .await
            .unwrap();
        let (_t2, mut in2) = TcpTransport::start(&config(2, &ports), shutdown.clone())
            .await
            .unwrap();

        t1.send(PartyId::new(2), br#"{"a":1}"#.to_vec()).unwrap();
        t1.send(PartyId::new(2), br#"{"a":2}"#.to_vec()).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), in2.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), in2.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, br#"{"a":1}"#.to_vec());
        assert_eq!(second, br#"{"a":2}"#.to_vec());
        assert!(matches!(
            t1.send(PartyId::new(9), vec![]),
            Err(TransportError::UnknownParty(_))
        ));
        shutdown.cancel();
    }
}
