//! Event Notifier: multi-subscriber publish for presentation layers.
//!
//! Handlers are invoked synchronously on the publishing thread, outside the
//! registry lock, so a handler may attach or detach subscribers (including
//! itself). A subscriber detached while a publish is in flight is skipped.
//! Handlers must not call back into the component that is publishing.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::assets::DanceId;

#[derive(Debug, Clone, PartialEq)]
pub enum DanceEvent {
    FrameChanged(usize),
    PlayStateChanged(bool),
    DataLoaded { dance: DanceId, success: bool },
    DownloadProgress {
        dance: DanceId,
        fraction: f32,
        phase: String,
    },
}

impl DanceEvent {
    pub fn channel(&self) -> Channel {
        match self {
            Self::FrameChanged(_) => Channel::FrameChanged,
            Self::PlayStateChanged(_) => Channel::PlayStateChanged,
            Self::DataLoaded { .. } => Channel::DataLoaded,
            Self::DownloadProgress { .. } => Channel::DownloadProgress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    FrameChanged,
    PlayStateChanged,
    DataLoaded,
    DownloadProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

type Handler = Arc<dyn Fn(&DanceEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriberId,
    channel: Option<Channel>,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Cloneable handle to a shared subscriber registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a handler that receives every event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&DanceEvent) + Send + Sync + 'static,
    {
        self.attach(None, Arc::new(handler))
    }

    /// Attaches a handler that only receives events from one channel.
    pub fn subscribe_to<F>(&self, channel: Channel, handler: F) -> SubscriberId
    where
        F: Fn(&DanceEvent) + Send + Sync + 'static,
    {
        self.attach(Some(channel), Arc::new(handler))
    }

    /// Detaches a subscriber. Returns false when it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut registry = self.lock();
        let before = registry.subscribers.len();
        registry.subscribers.retain(|subscriber| subscriber.id != id);
        registry.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn publish(&self, event: DanceEvent) {
        let channel = event.channel();
        let targets: Vec<(SubscriberId, Handler)> = self
            .lock()
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.channel.map_or(true, |c| c == channel))
            .map(|subscriber| (subscriber.id, subscriber.handler.clone()))
            .collect();

        for (id, handler) in targets {
            if self.is_attached(id) {
                handler(&event);
            }
        }
    }

    pub fn frame_changed(&self, frame: usize) {
        self.publish(DanceEvent::FrameChanged(frame));
    }

    pub fn play_state_changed(&self, playing: bool) {
        self.publish(DanceEvent::PlayStateChanged(playing));
    }

    pub fn data_loaded(&self, dance: &DanceId, success: bool) {
        self.publish(DanceEvent::DataLoaded {
            dance: dance.clone(),
            success,
        });
    }

    pub fn download_progress(&self, dance: &DanceId, fraction: f32, phase: impl Into<String>) {
        self.publish(DanceEvent::DownloadProgress {
            dance: dance.clone(),
            fraction,
            phase: phase.into(),
        });
    }

    fn attach(&self, channel: Option<Channel>, handler: Handler) -> SubscriberId {
        let mut registry = self.lock();
        let id = SubscriberId(registry.next_id);
        registry.next_id += 1;
        registry.subscribers.push(Subscriber {
            id,
            channel,
            handler,
        });
        id
    }

    fn is_attached(&self, id: SubscriberId) -> bool {
        self.lock()
            .subscribers
            .iter()
            .any(|subscriber| subscriber.id == id)
    }

    // A panicking handler never runs while the lock is held, so the registry
    // itself is always consistent.
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
