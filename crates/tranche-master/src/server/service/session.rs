//! Client-facing listener and per-connection sessions.
//!
//! Every accepted client gets its own session task. A session decodes request
//! frames in order, hands each to the [`router`](super::router), and writes
//! replies back on the same connection. Dispatch outcomes produced later by
//! per-worker tasks flow back through a session-owned channel and are
//! forwarded as they arrive, so a `start` request never blocks the session.

use super::{
    config::ServerConfig,
    handler::Master,
    router::{event_reply, route},
};
use crate::server::telemetry::{decrement_sessions_inflight, increment_sessions_inflight};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};
use tokio_util::{codec::Framed, sync::CancellationToken, task::TaskTracker};
use tranche_core::{FrameCodec, Reply};

/// Accepts clients until `shutdown` is cancelled, then waits up to the
/// configured shutdown timeout for open sessions to finish.
pub async fn serve(
    listener: TcpListener,
    master: Master,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let sessions = TaskTracker::new();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Failed to accept client: {e}");
                        continue;
                    }
                };

                sessions.spawn(serve_connection(
                    stream,
                    peer,
                    master.clone(),
                    config.clone(),
                    shutdown.clone(),
                ));
            }
        }
    }

    sessions.close();
    tracing::info!("Draining {} open sessions", sessions.len());
    if timeout(config.shutdown_timeout, sessions.wait()).await.is_err() {
        tracing::warn!(
            "Session drain timed out ({} sessions still open)",
            sessions.len()
        );
    }

    Ok(())
}

/// Runs one client session until EOF, a framing error, a write failure or
/// shutdown.
#[tracing::instrument(skip_all, fields(peer = %peer))]
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    master: Master,
    config: ServerConfig,
    shutdown: CancellationToken,
) {
    increment_sessions_inflight();
    tracing::debug!("Session opened");

    let mut framed = Framed::new(stream, FrameCodec::new(config.max_frame_bytes));
    let (events_tx, mut events_rx) = mpsc::channel(config.event_buffer_size);

    loop {
        let reply = tokio::select! {
            () = shutdown.cancelled() => break,
            Some(event) = events_rx.recv() => match event_reply(&event) {
                Some(reply) => reply,
                None => continue,
            },
            frame = framed.next() => match frame {
                None => break,
                Some(Ok(frame)) => match route(&master, frame, &events_tx).await {
                    Some(reply) => reply,
                    None => continue,
                },
                Some(Err(e)) => {
                    tracing::debug!("Closing session after framing error: {e}");
                    // Best effort: the peer may already be gone.
                    let _ = framed.send(Reply::from(e)).await;
                    break;
                }
            },
        };

        if let Err(e) = framed.send(reply).await {
            tracing::debug!("Failed to write reply: {e}");
            break;
        }
    }

    tracing::debug!("Session closed");
    decrement_sessions_inflight();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::pool::registry::{Registry, WorkerSpec};
    use core::{num::NonZeroU32, time::Duration};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio_util::codec::FramedRead;
    use tranche_core::{Command, DispatchMessage};

    struct Harness {
        client: BufReader<TcpStream>,
        workers: Vec<FramedRead<TcpStream, FrameCodec>>,
        shutdown: CancellationToken,
        server: tokio::task::JoinHandle<anyhow::Result<()>>,
    }

    /// Starts a master wired to `live` reachable workers followed by `dead`
    /// unreachable ones, and connects one client to it.
    async fn harness(live: &[u32], dead: &[u32]) -> Harness {
        let mut specs = Vec::new();
        let mut listeners = Vec::new();
        for w in live {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            specs.push(WorkerSpec {
                addr: listener.local_addr().unwrap().to_string(),
                weight: NonZeroU32::new(*w).unwrap(),
            });
            listeners.push(listener);
        }
        for w in dead {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            specs.push(WorkerSpec {
                addr: listener.local_addr().unwrap().to_string(),
                weight: NonZeroU32::new(*w).unwrap(),
            });
        }

        let config = ServerConfig {
            cancel_timeout: Duration::from_secs(1),
            dispatch_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(1),
            ..ServerConfig::default()
        };

        let connect = Registry::connect(specs, Duration::from_secs(5), FrameCodec::default());
        let accept = futures::future::join_all(listeners.iter().map(|l| async move {
            let (stream, _) = l.accept().await.unwrap();
            FramedRead::new(stream, FrameCodec::default())
        }));
        let (registry, workers) = tokio::join!(connect, accept);

        let master = Master::new(registry, &config);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, master, config, shutdown.clone()));

        let client = BufReader::new(TcpStream::connect(addr).await.unwrap());
        Harness {
            client,
            workers,
            shutdown,
            server,
        }
    }

    impl Harness {
        async fn send(&mut self, cmd: &str, body: &str) {
            let raw = format!("cmd: {cmd}\n body: {body}\n");
            self.client.get_mut().write_all(raw.as_bytes()).await.unwrap();
        }

        async fn line(&mut self) -> String {
            let mut line = String::new();
            timeout(Duration::from_secs(5), self.client.read_line(&mut line))
                .await
                .unwrap()
                .unwrap();
            line
        }

        async fn frame(&mut self) -> (String, String) {
            let cmd = self.line().await;
            let body = self.line().await;
            (cmd, body)
        }

        async fn stop(self) {
            self.shutdown.cancel();
            timeout(Duration::from_secs(5), self.server)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn get_over_the_wire() {
        let mut h = harness(&[1, 3], &[]).await;

        h.send("get", r#"{"cors":1,"hash":"abc","mod":"single"}"#).await;
        let (cmd, body) = h.frame().await;
        assert_eq!(cmd, "cmd: start\n");
        assert_eq!(
            body,
            " body: {\"pointer\":0,\"hash\":\"abc\",\"mod\":\"single\"}\n"
        );

        h.send("get", r#"{"cors":0,"hash":"abc","mod":"single"}"#).await;
        let (_, body) = h.frame().await;
        assert!(body.contains("\"pointer\":30000000000"), "{body}");

        h.stop().await;
    }

    #[tokio::test]
    async fn start_reaches_workers_and_stays_quiet_on_success() {
        let mut h = harness(&[1, 3], &[]).await;

        h.send("start", r#"{"hash":"job","mod":"all"}"#).await;
        for (worker, pointer) in h.workers.iter_mut().zip([0, 10_000_000_000]) {
            let frame = timeout(Duration::from_secs(5), worker.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let msg = DispatchMessage::from_frame(&frame).unwrap();
            assert_eq!(msg.pointer, pointer);
            assert_eq!(msg.state.hash, "job");
        }

        // The next reply on the wire belongs to the following request.
        h.send("get", r#"{"cors":0}"#).await;
        let (cmd, body) = h.frame().await;
        assert_eq!(cmd, "cmd: start\n");
        assert!(body.contains("\"pointer\":40000000000"), "{body}");

        h.stop().await;
    }

    #[tokio::test]
    async fn dispatch_failures_are_forwarded_to_the_caller() {
        let mut h = harness(&[1], &[2]).await;

        h.send("start", r#"{"hash":"job","mod":""}"#).await;
        assert_eq!(h.line().await, "Worker 1 unavailable\n");

        let frame = h.workers[0].next().await.unwrap().unwrap();
        assert_eq!(DispatchMessage::from_frame(&frame).unwrap().pointer, 0);

        h.stop().await;
    }

    #[tokio::test]
    async fn cancel_over_the_wire() {
        let mut h = harness(&[1, 1], &[1]).await;

        h.send("cancel", "{}").await;
        let (cmd, body) = h.frame().await;
        assert_eq!(cmd, "cmd: cancel\n");
        assert_eq!(body, " body: {\"workers\":3,\"delivered\":2}\n");

        for worker in &mut h.workers {
            let frame = worker.next().await.unwrap().unwrap();
            assert_eq!(frame.command().unwrap(), Command::Cancel);
        }

        h.stop().await;
    }

    #[tokio::test]
    async fn bad_requests_keep_the_session_open() {
        let mut h = harness(&[1], &[]).await;

        h.send("get", "{broken").await;
        assert!(h.line().await.starts_with("Invalid request"));

        h.send("launch", "{}").await;
        assert_eq!(h.line().await, "Unknown command: \"launch\"\n");

        h.send("get", "{}").await;
        let (cmd, _) = h.frame().await;
        assert_eq!(cmd, "cmd: start\n");

        h.stop().await;
    }

    #[tokio::test]
    async fn framing_errors_close_the_session() {
        let mut h = harness(&[1], &[]).await;

        h.client
            .get_mut()
            .write_all(b"hello\nworld\n")
            .await
            .unwrap();
        assert!(h.line().await.starts_with("Malformed frame"));
        assert_eq!(h.line().await, "", "session should be closed");

        h.stop().await;
    }

    #[tokio::test]
    async fn shutdown_closes_open_sessions() {
        let mut h = harness(&[1], &[]).await;
        h.send("get", "{}").await;
        h.frame().await;

        h.shutdown.cancel();
        assert_eq!(h.line().await, "");
        timeout(Duration::from_secs(5), h.server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
