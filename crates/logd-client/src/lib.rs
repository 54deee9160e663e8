// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client helper for the logd session protocol (spec.md §4.E, §6).
//!
//! [`SessionClient`] owns a reader task that demultiplexes incoming
//! [`Response`] frames by their correlation id, routing [`Response::Event`]
//! deliveries (which carry no id — they are not replies) to a separate
//! queue a caller drains with [`SessionClient::next_event`].

use anyhow::{anyhow, Context, Result};
use logd_proto::{wire, Envelope, Request, Response, WatchEventMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>;

/// A connection to a logd server's session protocol.
pub struct SessionClient {
    outbound: mpsc::Sender<Vec<u8>>,
    pending: PendingReplies,
    next_id: AtomicU64,
    events: Mutex<mpsc::Receiver<WatchEventMessage>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl SessionClient {
    /// Connect to a logd server over TCP.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.context("connect to logd server")?;
        Ok(Self::from_stream(stream))
    }

    /// Build a client over an already-established duplex stream (used by
    /// tests over `tokio::io::duplex`, and available to embedders that
    /// already hold a connected socket).
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(256);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(256);
        let reader_pending = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut acc: Vec<u8> = Vec::with_capacity(64 * 1024);
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                acc.extend_from_slice(&buf[..n]);

                loop {
                    match wire::decode::<Envelope<Response>>(&acc) {
                        Ok((envelope, consumed)) => {
                            acc.drain(..consumed);
                            dispatch_response(envelope, &reader_pending, &event_tx).await;
                        }
                        Err(wire::FrameError::IncompleteLength | wire::FrameError::IncompleteBody) => break,
                        Err(err) => {
                            warn!(?err, "failed to decode response frame, closing connection");
                            return;
                        }
                    }
                }
            }
        });

        Self {
            outbound: outbound_tx,
            pending,
            next_id: AtomicU64::new(1),
            events: Mutex::new(event_rx),
            reader_task,
            writer_task,
        }
    }

    /// Send `req` and await the matching reply, correlated by a
    /// client-assigned id (spec.md §6 "plus an optional `id` that mirrors
    /// the request `id`").
    ///
    /// # Errors
    /// Returns an error if the connection is closed before a reply arrives,
    /// or if the request fails to encode.
    pub async fn call(&self, req: Request) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let envelope = Envelope { id: Some(id.clone()), body: req };
        let frame = wire::encode(&envelope).context("encode request")?;
        if self.outbound.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(anyhow!("connection closed before request could be sent"));
        }

        rx.await.map_err(|_| anyhow!("connection closed before a response arrived"))
    }

    /// Receive the next watch event delivered on this connection, across
    /// every watch registered by this client (events carry their own
    /// `watch_id` field to disambiguate).
    pub async fn next_event(&self) -> Option<WatchEventMessage> {
        self.events.lock().await.recv().await
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

async fn dispatch_response(envelope: Envelope<Response>, pending: &PendingReplies, events: &mpsc::Sender<WatchEventMessage>) {
    match envelope.body {
        Response::Event(event) => {
            let _ = events.send(event).await;
        }
        other => {
            let Some(id) = envelope.id else {
                warn!("received a non-event response with no correlation id");
                return;
            };
            if let Some(tx) = pending.lock().await.remove(&id) {
                let _ = tx.send(other);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::KPath;
    use logd_proto::{HelloRequest, MatchRequest};
    use logd_storage::Storage;
    use logd_txn::TxTable;
    use logd_watch::WatchHub;
    use std::sync::Arc as StdArc;
    use std::time::Duration;
    use tokio::io::duplex;

    fn test_engine() -> logd_session::Engine {
        let storage = Storage::new();
        logd_session::Engine {
            txs: StdArc::new(TxTable::new(storage.clone(), Duration::from_secs(5))),
            storage,
            hub: WatchHub::new(),
        }
    }

    #[tokio::test]
    async fn hello_round_trips_against_a_real_session() {
        let (client_side, server_side) = duplex(8192);
        let server = tokio::spawn(logd_session::run_session(server_side, test_engine(), logd_session::SessionConfig::default()));
        let client = SessionClient::from_stream(client_side);

        let response = client.call(Request::Hello(HelloRequest { client_info: Some("test".to_string()) })).await.unwrap();
        assert!(matches!(response, Response::Hello));

        drop(client);
        server.abort();
    }

    #[tokio::test]
    async fn match_on_empty_storage_reads_null() {
        let (client_side, server_side) = duplex(8192);
        let server = tokio::spawn(logd_session::run_session(server_side, test_engine(), logd_session::SessionConfig::default()));
        let client = SessionClient::from_stream(client_side);

        let req = MatchRequest { path: KPath::root(), scope: None, at_commit: None, match_doc: None };
        let response = client.call(Request::Match(req)).await.unwrap();
        match response {
            Response::Match(result) => assert_eq!(result.matched, None),
            other => panic!("unexpected response: {other:?}"),
        }

        drop(client);
        server.abort();
    }
}
