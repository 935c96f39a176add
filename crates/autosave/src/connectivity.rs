//! Network availability and the listener that reacts to it.
//!
//! [`NetworkMonitor`] holds the online flag the rest of the pipeline consults.
//! [`ConnectivityListener`] runs in the background: it drains the pending-save
//! queue whenever the network comes back, and reloads the queue when another
//! session sharing the same storage partition rewrites it.

use crate::backend::SaveBackend;
use crate::service::AutosaveService;
use store::KeyValueStorage;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Online/offline signal
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Report a connectivity change. Returns whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Background task reacting to connectivity and storage changes
pub struct ConnectivityListener;

impl ConnectivityListener {
    /// Start listening on behalf of `service`.
    ///
    /// If the network is available and saves are already pending (e.g.
    /// restored from a previous session), a flush runs immediately.
    pub fn spawn<B, S>(service: AutosaveService<B, S>) -> ListenerHandle
    where
        B: SaveBackend + 'static,
        S: KeyValueStorage + 'static,
    {
        let mut online_rx = service.network().subscribe();

        let task = tokio::spawn(async move {
            let (mut storage_rx, key, origin) = service.storage_subscription().await;
            let mut storage_open = true;
            let mut was_online = *online_rx.borrow_and_update();

            if was_online && service.pending_count().await > 0 {
                service.flush().await;
            }

            loop {
                tokio::select! {
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *online_rx.borrow_and_update();
                        // A quick offline/online flap can arrive as a single change
                        let reconnected = online
                            && (!was_online || service.pending_count().await > 0);
                        if reconnected {
                            tracing::info!("Network available, flushing pending saves");
                            let outcome = service.flush().await;
                            tracing::debug!("Reconnect flush finished: {:?}", outcome);
                        } else if !online && was_online {
                            tracing::info!("Network unavailable, saves will be queued");
                        }
                        was_online = online;
                    }
                    event = storage_rx.recv(), if storage_open => {
                        match event {
                            Ok(event) if event.key == key && event.origin != origin => {
                                tracing::debug!("Pending saves changed in {}, reloading", event.origin);
                                service.reload_queue().await;
                            }
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                tracing::debug!("Missed {} storage events, reloading", missed);
                                service.reload_queue().await;
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                storage_open = false;
                            }
                        }
                    }
                }
            }
        });

        ListenerHandle { task }
    }
}

/// Handle to a running [`ConnectivityListener`]; stops it when dropped
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop listening
    pub fn shutdown(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
