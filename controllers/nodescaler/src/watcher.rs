//! Game-session pod watcher.
//!
//! Watches pods matching the game selector and sends a signal on the event
//! channel whenever a game session starts or ends, so the reconciliation loop
//! can react before the next tick. Pod modifications are not signalled.

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube_runtime::watcher::{self, Event};
use kube_runtime::WatchStreamExt;
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to the running watcher task
#[derive(Debug)]
pub struct GameWatcher {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl GameWatcher {
    /// Starts watching game-session pods across all namespaces.
    ///
    /// The returned receiver yields one `()` per added or deleted game
    /// session. It closes once the watcher has stopped.
    pub fn start(api: Api<Pod>, game_selector: &str) -> (Self, mpsc::Receiver<()>) {
        info!("Starting game session watcher with selector {}", game_selector);
        let config = watcher::Config::default().labels(game_selector);
        Self::from_stream(watcher::watcher(api, config).default_backoff())
    }

    /// Starts forwarding signals from an arbitrary watch event stream
    pub fn from_stream<S>(stream: S) -> (Self, mpsc::Receiver<()>)
    where
        S: Stream<Item = Result<Event<Pod>, watcher::Error>> + Send + 'static,
    {
        // Capacity 1: the forwarding task waits while a signal is pending
        let (events_tx, events_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(forward_events(stream, events_tx, stop_rx));
        (
            Self {
                stop: Some(stop_tx),
                task,
            },
            events_rx,
        )
    }

    /// Closes the watch, then waits for the forwarding task to exit.
    ///
    /// The event channel is closed only once the task has returned.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            // Err means the task already exited
            let _ = stop.send(());
        }
        if let Err(e) = self.task.await {
            warn!("Game session watcher task failed: {}", e);
        }
        info!("Game session watcher stopped");
    }
}

async fn forward_events<S>(stream: S, events: mpsc::Sender<()>, mut stop: oneshot::Receiver<()>)
where
    S: Stream<Item = Result<Event<Pod>, watcher::Error>> + Send,
{
    let mut stream = std::pin::pin!(stream);
    let mut sessions = SessionTracker::default();

    loop {
        let item = tokio::select! {
            biased;
            _ = &mut stop => break,
            item = stream.next() => item,
        };

        let Some(item) = item else {
            debug!("Game session watch stream ended");
            break;
        };

        let changed = match item {
            Ok(event) => sessions.observe(event),
            Err(e) => {
                warn!("Game session watch error: {}", e);
                false
            }
        };
        if !changed {
            continue;
        }

        tokio::select! {
            biased;
            _ = &mut stop => break,
            sent = events.send(()) => {
                if sent.is_err() {
                    debug!("Event receiver dropped, stopping game session watcher");
                    break;
                }
            }
        }
    }
}

/// Set of game-session pods currently known to exist
#[derive(Debug, Default)]
struct SessionTracker {
    known: HashSet<String>,
    /// Pods seen during a re-list, swapped in at `InitDone`
    relist: Option<HashSet<String>>,
}

impl SessionTracker {
    /// Applies one watch event, returning whether a session was added or deleted
    fn observe(&mut self, event: Event<Pod>) -> bool {
        match event {
            Event::Apply(pod) => pod_key(&pod).is_some_and(|key| self.known.insert(key)),
            Event::Delete(pod) => {
                if let Some(key) = pod_key(&pod) {
                    self.known.remove(&key);
                }
                true
            }
            Event::Init => {
                self.relist = Some(HashSet::new());
                false
            }
            Event::InitApply(pod) => {
                if let Some(key) = pod_key(&pod) {
                    self.relist.get_or_insert_with(HashSet::new).insert(key);
                }
                false
            }
            Event::InitDone => {
                let relisted = self.relist.take().unwrap_or_default();
                let changed = relisted != self.known;
                self.known = relisted;
                changed
            }
        }
    }
}

fn pod_key(pod: &Pod) -> Option<String> {
    pod.metadata
        .uid
        .clone()
        .or_else(|| Some(format!("{}/{}", pod.metadata.namespace.as_deref()?, pod.metadata.name.as_deref()?)))
}
