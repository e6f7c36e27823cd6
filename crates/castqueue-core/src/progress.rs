//! In-process progress fan-out (component C4).
//!
//! Each task gets a `tokio::sync::broadcast` channel plus a last-value
//! cache, turning a process's published events into an `async_stream`-built
//! `Stream<Item = ProgressEvent>`.
//! Progress is not persisted (see the Open Question decision in
//! `DESIGN.md`): a subscriber joining late sees the cached latest event plus
//! everything published after it.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use castqueue_db::models::Stage;

/// A single progress update for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub task_id: Uuid,
    pub stage: Stage,
    pub progress_pct: Option<f32>,
    pub message: Option<String>,
    pub estimated_remaining_seconds: Option<u64>,
    pub terminal: bool,
}

impl ProgressEvent {
    pub fn terminal(task_id: Uuid, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            task_id,
            stage,
            progress_pct: Some(100.0),
            message: Some(message.into()),
            estimated_remaining_seconds: Some(0),
            terminal: true,
        }
    }
}

struct TaskChannel {
    sender: broadcast::Sender<ProgressEvent>,
    last: ProgressEvent,
}

/// Default per-subscriber channel capacity (`progress_subscriber_buffer`);
/// events beyond this are dropped for a lagging subscriber, never for the
/// publisher.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;

/// Fan-out hub for task progress events.
///
/// Cheap to clone (wraps an `Arc`); intended to be shared across the
/// worker loop, the command surface, and any HTTP/SSE layer.
#[derive(Clone)]
pub struct ProgressBus {
    channels: Arc<Mutex<HashMap<Uuid, TaskChannel>>>,
    buffer: usize,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus whose per-task broadcast channel holds `buffer` events.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            buffer,
        }
    }

    /// Publish an event for `event.task_id`, creating its channel on first
    /// use. If the event is terminal and nobody is subscribed, the channel
    /// is dropped immediately rather than lingering forever.
    pub async fn publish(&self, event: ProgressEvent) {
        let buffer = self.buffer;
        let mut channels = self.channels.lock().await;
        let entry = channels.entry(event.task_id).or_insert_with(|| TaskChannel {
            sender: broadcast::channel(buffer).0,
            last: event.clone(),
        });
        entry.last = event.clone();
        let receiver_count = entry.sender.receiver_count();
        let _ = entry.sender.send(event.clone());

        if event.terminal && receiver_count == 0 {
            channels.remove(&event.task_id);
        }
    }

    /// Return the most recently published event for a task, if any.
    pub async fn current(&self, task_id: Uuid) -> Option<ProgressEvent> {
        let channels = self.channels.lock().await;
        channels.get(&task_id).map(|c| c.last.clone())
    }

    /// Subscribe to a task's progress stream. If a last event is already
    /// cached for this task, the stream yields it immediately; otherwise
    /// the first yield is whatever gets published next. Either way the
    /// stream then yields every subsequent publish, ending when a terminal
    /// event is observed or the sender is dropped.
    pub async fn subscribe(
        &self,
        task_id: Uuid,
    ) -> Pin<Box<dyn Stream<Item = ProgressEvent> + Send>> {
        let buffer = self.buffer;
        let (last, mut receiver) = {
            let mut channels = self.channels.lock().await;
            let existing_last = channels.get(&task_id).map(|c| c.last.clone());
            let entry = channels.entry(task_id).or_insert_with(|| TaskChannel {
                sender: broadcast::channel(buffer).0,
                last: ProgressEvent {
                    task_id,
                    stage: Stage::Download,
                    progress_pct: None,
                    message: None,
                    estimated_remaining_seconds: None,
                    terminal: false,
                },
            });
            (existing_last, entry.sender.subscribe())
        };

        Box::pin(async_stream::stream! {
            if let Some(last) = last {
                yield last;
            }
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let is_terminal = event.terminal;
                        yield event;
                        if is_terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Number of tasks currently tracked. Used by tests to assert garbage
    /// collection happened.
    pub async fn tracked_task_count(&self) -> usize {
        self.channels.lock().await.len()
    }
}
