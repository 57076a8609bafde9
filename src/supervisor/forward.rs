//! Port-forward multiplexer: one listening socket per manifest forward,
//! tunneling accepted connections into the pod.

use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::{Error, Result};
use crate::manifest::Forward;

struct ForwardTask {
    local: i32,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Owns the listening sockets for every `{local, remote}` pair in a
/// manifest. A single stream failure is isolated: it restarts that one
/// forward, the others keep running.
pub struct Multiplexer {
    client: kube::Client,
    namespace: String,
    pod_name: String,
    tasks: Vec<ForwardTask>,
}

impl Multiplexer {
    pub fn new(client: kube::Client, namespace: &str, pod_name: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            pod_name: pod_name.to_string(),
            tasks: Vec::new(),
        }
    }

    /// Binds a listener per forward and starts tunneling. Returns once
    /// every listener is bound — the tunnel loops themselves run in the
    /// background.
    pub async fn start(&mut self, forwards: &[Forward]) -> Result<()> {
        for forward in forwards {
            self.start_one(forward).await?;
        }
        Ok(())
    }

    async fn start_one(&mut self, forward: &Forward) -> Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", forward.local as u16))
            .await
            .map_err(|e| Error::MultiplexerFailed(format!("binding local port {}: {e}", forward.local)))?;

        let cancel = CancellationToken::new();
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pod_name = self.pod_name.clone();
        let remote = forward.remote as u16;
        let local = forward.local;
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let api = api.clone();
                        let pod_name = pod_name.clone();
                        tokio::spawn(async move {
                            if let Err(e) = tunnel_one(api, &pod_name, remote, stream).await {
                                tracing::warn!(error = %e, local, "forwarded connection failed");
                            }
                        });
                    }
                }
            }
        });

        self.tasks.push(ForwardTask { local: forward.local, cancel, handle });
        Ok(())
    }

    /// Restarts a single forward in isolation, leaving the others
    /// untouched.
    pub async fn restart_one(&mut self, forward: &Forward) -> Result<()> {
        if let Some(pos) = self.tasks.iter().position(|t| t.local == forward.local) {
            let task = self.tasks.remove(pos);
            task.cancel.cancel();
            let _ = task.handle.await;
        }
        self.start_one(forward).await
    }

    /// Stops accepting new connections and cancels every in-flight tunnel.
    pub async fn stop(self) -> Result<()> {
        for task in &self.tasks {
            task.cancel.cancel();
        }
        for task in self.tasks {
            let _ = task.handle.await;
        }
        Ok(())
    }
}

async fn tunnel_one(api: Api<Pod>, pod_name: &str, remote_port: u16, mut local_stream: tokio::net::TcpStream) -> Result<()> {
    let mut forwarder = api
        .portforward(pod_name, &[remote_port])
        .await
        .map_err(|e| Error::MultiplexerFailed(e.to_string()))?;

    let mut remote_stream = forwarder
        .take_stream(remote_port)
        .ok_or_else(|| Error::MultiplexerFailed("no stream for forwarded port".to_string()))?;

    tokio::io::copy_bidirectional(&mut local_stream, &mut remote_stream)
        .await
        .map_err(Error::Io)?;
    Ok(())
}
