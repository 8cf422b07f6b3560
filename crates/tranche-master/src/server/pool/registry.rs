//! Fixed registry of workers and their outbound connections.
//!
//! The registry is built exactly once at startup: the worker list is read
//! from a JSON file, every worker is dialed concurrently, and the resulting
//! entries never change afterwards. A worker whose initial connection fails is
//! kept (degraded, not removed) so indices stay stable; any later attempt to
//! use it fails with [`Error::WorkerUnavailable`].

use super::connection::Connection;
use anyhow::{Context, bail};
use core::{num::NonZeroU32, time::Duration};
use serde::Deserialize;
use std::path::Path;
use tokio::{net::TcpStream, time::timeout};
use tranche_core::{Error, FrameCodec};

/// One entry of the worker list file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerSpec {
    pub addr: String,
    /// Ticket-block multiplier, stored as `cors` on disk.
    #[serde(rename = "cors")]
    pub weight: NonZeroU32,
}

/// Reads the worker list from `path`.
///
/// # Errors
///
/// The file is missing or unreadable, is not a JSON array of worker specs
/// (a zero weight is rejected here), or lists no workers at all.
pub fn load(path: &Path) -> anyhow::Result<Vec<WorkerSpec>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read worker list {}", path.display()))?;
    parse(&data).with_context(|| format!("invalid worker list {}", path.display()))
}

fn parse(data: &str) -> anyhow::Result<Vec<WorkerSpec>> {
    let specs: Vec<WorkerSpec> = serde_json::from_str(data)?;
    if specs.is_empty() {
        bail!("worker list is empty");
    }
    Ok(specs)
}

/// A remote executor known to the master.
#[derive(Debug)]
pub struct Worker {
    index: usize,
    addr: String,
    weight: NonZeroU32,
    connection: Option<Connection>,
}

impl Worker {
    pub const fn index(&self) -> usize {
        self.index
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub const fn weight(&self) -> NonZeroU32 {
        self.weight
    }

    /// The live connection, or [`Error::WorkerUnavailable`] if the worker
    /// never connected.
    pub fn connection(&self) -> Result<&Connection, Error> {
        self.connection
            .as_ref()
            .ok_or(Error::WorkerUnavailable { index: self.index })
    }
}

/// Ordered, fixed-size set of workers. A worker's index is its identity.
#[derive(Debug)]
pub struct Registry {
    workers: Vec<Worker>,
}

impl Registry {
    /// Dials every worker concurrently, bounding each attempt by
    /// `connect_timeout`. Failures are logged and leave that worker without a
    /// connection.
    pub async fn connect(
        specs: Vec<WorkerSpec>,
        connect_timeout: Duration,
        codec: FrameCodec,
    ) -> Self {
        let dials = specs.into_iter().enumerate().map(|(index, spec)| {
            let codec = codec.clone();
            async move {
                let connection = match dial(&spec.addr, connect_timeout).await {
                    Ok(stream) => {
                        tracing::info!(worker = index, addr = %spec.addr, "Connected to worker");
                        Some(Connection::new(index, stream, codec))
                    }
                    Err(e) => {
                        tracing::warn!(
                            worker = index,
                            addr = %spec.addr,
                            "Worker unreachable, keeping it registered without a connection: {e}"
                        );
                        None
                    }
                };

                Worker {
                    index,
                    addr: spec.addr,
                    weight: spec.weight,
                    connection,
                }
            }
        });

        Self {
            workers: futures::future::join_all(dials).await,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Looks up a worker by index.
    ///
    /// # Errors
    ///
    /// [`Error::WorkerOutOfRange`] if `index` is past the end of the registry.
    pub fn get(&self, index: usize) -> Result<&Worker, Error> {
        self.workers.get(index).ok_or(Error::WorkerOutOfRange {
            index,
            len: self.workers.len(),
        })
    }

    /// The connection of worker `index`, or `None` if the index is unknown or
    /// the worker never connected. Absence is only an error once somebody
    /// tries to write.
    pub fn connection(&self, index: usize) -> Option<&Connection> {
        self.workers.get(index)?.connection.as_ref()
    }

    /// Number of workers holding a live connection.
    pub fn connected(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.connection.is_some())
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter()
    }
}

async fn dial(addr: &str, connect_timeout: Duration) -> Result<TcpStream, Error> {
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Io {
            context: format!("connect to {addr} timed out after {connect_timeout:?}"),
        })??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn parses_the_worker_list() {
        let specs = parse(
            r#"[{"addr":"10.0.0.1:4000","cors":1},{"addr":"10.0.0.2:4000","cors":3}]"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].addr, "10.0.0.2:4000");
        assert_eq!(specs[1].weight.get(), 3);
    }

    #[test]
    fn rejects_zero_weight() {
        assert!(parse(r#"[{"addr":"10.0.0.1:4000","cors":0}]"#).is_err());
    }

    #[test]
    fn rejects_empty_and_malformed_lists() {
        assert!(parse("[]").is_err());
        assert!(parse("{not json").is_err());
        assert!(parse(r#"[{"addr":"10.0.0.1:4000"}]"#).is_err());
    }

    #[test]
    fn missing_file_is_a_configuration_fault() {
        let err = load(Path::new("/nonexistent/tranche-workers.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read worker list"));
    }

    #[tokio::test]
    async fn unreachable_workers_stay_registered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap().to_string();

        // Bind and drop to get a port nobody listens on.
        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };

        let specs = vec![
            WorkerSpec {
                addr: live,
                weight: NonZeroU32::new(1).unwrap(),
            },
            WorkerSpec {
                addr: dead,
                weight: NonZeroU32::new(2).unwrap(),
            },
        ];

        let registry =
            Registry::connect(specs, Duration::from_secs(5), FrameCodec::default()).await;

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.connected(), 1);
        assert!(registry.connection(0).is_some());
        assert!(registry.connection(1).is_none());
        assert!(registry.connection(7).is_none());
        assert_eq!(registry.get(1).unwrap().weight().get(), 2);
        assert!(matches!(
            registry.get(1).unwrap().connection(),
            Err(Error::WorkerUnavailable { index: 1 })
        ));
        assert!(matches!(
            registry.get(2),
            Err(Error::WorkerOutOfRange { index: 2, len: 2 })
        ));
    }
}
