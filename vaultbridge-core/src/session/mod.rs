//! Session protocol to the vault engine.
//!
//! One [`SessionClient`] per engine process. Requests are framed as JSON
//! envelopes and exchanged strictly one at a time: the wire carries no
//! request id, so replies are matched by order alone.
//!
//! Each call is placed on a FIFO queue the moment it is issued. A single
//! worker task owns the transport and runs one write/read exchange at a time,
//! so two calls issued `A` then `B` are always written and answered in that
//! order, whatever order their futures are polled in.

mod command;
mod response;
mod transport;
mod vault;

use std::future::Future;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context as TaskContext, Poll, Waker};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::ClientConfig;
use crate::error::{VaultError, VaultResult};

pub use command::Command;
pub use response::Response;
pub use transport::Transport;
pub use vault::{
    EncryptionInit, EncryptionStatus, MasterPasswordEncryption, Vault, VaultEncryption,
    VaultStatus, DEFAULT_RECORD_FILTER, DEFAULT_VAULT_FILTER, MASTER_ENCRYPTION_KEY,
    MASTER_PASSWORD_KEY,
};

use command::Envelope;
use response::parse_reply;

/// Startup state of the engine as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Bootstrap has not finished.
    Starting,
    /// Bootstrap succeeded; every command may be sent.
    Ready,
    /// Bootstrap failed or the session was closed before it finished.
    Failed(String),
}

/// A command waiting for its turn on the wire.
struct PendingRequest {
    command: Command,
    params: Option<Map<String, Value>>,
    reply: oneshot::Sender<VaultResult<Response>>,
}

struct Channel<T> {
    transport: Arc<T>,
    queue: mpsc::UnboundedSender<PendingRequest>,
}

/// Client for the vault engine.
pub struct SessionClient<T: Transport> {
    channel: Mutex<Option<Channel<T>>>,
    readiness: watch::Sender<Readiness>,
    source: String,
    storage_path: PathBuf,
    read_only: bool,
}

impl<T: Transport> std::fmt::Debug for SessionClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("readiness", &*self.readiness.borrow())
            .field("source", &self.source)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SessionClient<T> {
    /// Wraps `transport` and starts the session worker.
    ///
    /// The client starts in [`Readiness::Starting`]; call
    /// [`Self::bootstrap`] before sending regular commands.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(transport: T, config: &ClientConfig) -> Self {
        let transport = Arc::new(transport);
        let (queue, requests) = mpsc::unbounded_channel();
        tokio::spawn(run_session(
            Arc::clone(&transport),
            requests,
            config.source.clone(),
        ));
        let (readiness, _) = watch::channel(Readiness::Starting);
        Self {
            channel: Mutex::new(Some(Channel { transport, queue })),
            readiness,
            source: config.source.clone(),
            storage_path: config.storage_path.clone(),
            read_only: config.read_only,
        }
    }

    /// Returns `true` until [`Self::close_all_instances`] has run.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Current startup state.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().clone()
    }

    /// Returns `true` once bootstrap has succeeded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.readiness.borrow(), Readiness::Ready)
    }

    /// Sends one command and waits for its reply.
    ///
    /// The request is queued when this method is called, not when the
    /// returned future is first polled.
    ///
    /// # Errors
    ///
    /// - [`VaultError::TransportUnavailable`] if the session was closed.
    /// - [`VaultError::NotInitialized`] for non-bootstrap commands before
    ///   bootstrap has succeeded.
    /// - [`VaultError::VaultLocked`] or [`VaultError::EngineError`] when the
    ///   engine replies with an error.
    /// - [`VaultError::Channel`] if the transport fails mid-exchange.
    pub fn send(
        &self,
        command: Command,
        params: Option<Map<String, Value>>,
    ) -> impl Future<Output = VaultResult<Response>> + Send + 'static {
        let enqueued = self.enqueue(command, params);
        async move {
            enqueued?
                .await
                .map_err(|_| VaultError::TransportUnavailable)?
        }
    }

    fn enqueue(
        &self,
        command: Command,
        params: Option<Map<String, Value>>,
    ) -> VaultResult<oneshot::Receiver<VaultResult<Response>>> {
        let guard = self.channel.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(channel) = guard.as_ref() else {
            return Err(VaultError::TransportUnavailable);
        };
        if !command.is_bootstrap() && !self.is_ready() {
            return Err(VaultError::NotInitialized);
        }

        let (reply, receiver) = oneshot::channel();
        channel
            .queue
            .send(PendingRequest {
                command,
                params,
                reply,
            })
            .map_err(|_| VaultError::TransportUnavailable)?;
        Ok(receiver)
    }

    /// Runs the startup sequence: storage path, then store options.
    ///
    /// Marks the session ready on success and failed otherwise.
    ///
    /// # Errors
    ///
    /// Returns the first failing command's error.
    pub async fn bootstrap(&self) -> VaultResult<()> {
        let result = async {
            self.set_storage_path(&self.storage_path).await?;
            self.set_core_store_options(self.read_only).await
        }
        .await;

        match &result {
            Ok(()) => {
                tracing::info!("vault engine ready");
                self.readiness.send_replace(Readiness::Ready);
            }
            Err(e) => {
                tracing::error!("vault engine bootstrap failed: {e}");
                self.readiness.send_replace(Readiness::Failed(e.to_string()));
            }
        }
        result
    }

    /// Waits until bootstrap has finished.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InitializationFailed`] if bootstrap failed or
    /// the session was closed before it finished.
    pub async fn wait_until_ready(&self) -> VaultResult<()> {
        let mut updates = self.readiness.subscribe();
        let state = updates
            .wait_for(|state| *state != Readiness::Starting)
            .await
            .map_err(|_| VaultError::TransportUnavailable)?
            .clone();
        match state {
            Readiness::Ready => Ok(()),
            Readiness::Failed(reason) => Err(VaultError::InitializationFailed(reason)),
            Readiness::Starting => Err(VaultError::NotInitialized),
        }
    }

    /// Closes every engine instance and drops the transport.
    ///
    /// Skips the queue and never waits. Inside a Tokio runtime the close
    /// frame is offered to the transport once; if it is not accepted on the
    /// spot it is dropped, and no reply is read. Outside a runtime the frame
    /// is skipped. The transport is shut down before this returns. Never
    /// fails; calling it twice is a no-op.
    pub fn close_all_instances(&self) {
        let Some(channel) = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            tracing::debug!("close requested with no transport");
            return;
        };

        let Channel { transport, queue } = channel;
        drop(queue);

        if tokio::runtime::Handle::try_current().is_ok() {
            offer_close_frame(transport.as_ref(), &self.source);
        } else {
            tracing::debug!("no runtime, closing without a close frame");
        }
        transport.shutdown();

        self.readiness.send_if_modified(|state| {
            if *state == Readiness::Starting {
                *state = Readiness::Failed("session closed".to_string());
                true
            } else {
                false
            }
        });
        tracing::info!("closed all vault instances");
    }
}

/// Polls the close frame write once without waiting on it.
fn offer_close_frame<T: Transport>(transport: &T, source: &str) {
    let frame = match serde_json::to_vec(&Envelope::new(Command::CloseAllInstances, None, source))
    {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("failed to encode close frame: {e}");
            return;
        }
    };

    let mut write = pin!(transport.write(frame));
    let mut cx = TaskContext::from_waker(Waker::noop());
    match write.as_mut().poll(&mut cx) {
        Poll::Ready(Ok(())) => {}
        Poll::Ready(Err(e)) => tracing::debug!("close frame not delivered: {e}"),
        Poll::Pending => tracing::debug!("close frame not accepted at once, dropping it"),
    }
}

async fn run_session<T: Transport>(
    transport: Arc<T>,
    mut requests: mpsc::UnboundedReceiver<PendingRequest>,
    source: String,
) {
    while let Some(request) = requests.recv().await {
        let command = request.command;
        let result = exchange(transport.as_ref(), &request, &source).await;
        if let Err(e) = &result {
            tracing::debug!(%command, "command failed: {e}");
        }
        if request.reply.send(result).is_err() {
            tracing::debug!(%command, "caller went away before the reply");
        }
    }
    tracing::debug!("session worker stopped");
}

async fn exchange<T: Transport>(
    transport: &T,
    request: &PendingRequest,
    source: &str,
) -> VaultResult<Response> {
    let frame = serde_json::to_vec(&Envelope::new(
        request.command,
        request.params.as_ref(),
        source,
    ))?;
    transport.write(frame).await.map_err(VaultError::Channel)?;
    let reply = transport.read().await.map_err(VaultError::Channel)?;
    parse_reply(&reply)
}

/// Builds a parameter map from key/value pairs.
pub(crate) fn params<const N: usize>(pairs: [(&str, Value); N]) -> Option<Map<String, Value>> {
    Some(
        pairs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}
