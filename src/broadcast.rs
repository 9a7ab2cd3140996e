//! Best-effort fan-out of rig snapshots to live displays.

use fnv::FnvHashMap;
use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::session::RigSnapshot;

pub const DEFAULT_CAPACITY: usize = 8;

#[derive(Debug)]
struct Channel {
    // None once closed
    sender: Option<broadcast::Sender<Arc<RigSnapshot>>>,
    last: Option<Arc<RigSnapshot>>,
}

/// One channel per rig. Every subscriber has its own bounded window onto the channel, a subscriber
/// which falls behind loses its oldest snapshots and never holds up the publisher.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    capacity: usize,
    channels: Arc<Mutex<FnvHashMap<String, Channel>>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Broadcaster::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Broadcaster {
        Broadcaster {
            capacity: capacity.max(1),
            channels: Arc::new(Mutex::new(FnvHashMap::default())),
        }
    }

    fn channel<'a>(
        channels: &'a mut FnvHashMap<String, Channel>,
        rig_id: &str,
        capacity: usize,
    ) -> &'a mut Channel {
        channels.entry(rig_id.to_string()).or_insert_with(|| Channel {
            sender: Some(broadcast::channel(capacity).0),
            last: None,
        })
    }

    /// Start a fresh channel for `rig_id`, dropping any closed one and its last snapshot.
    pub fn open(&self, rig_id: &str) {
        let mut channels = self.channels.lock();
        let channel = Broadcaster::channel(&mut channels, rig_id, self.capacity);
        if channel.sender.is_none() {
            channel.sender = Some(broadcast::channel(self.capacity).0);
            channel.last = None;
        }
    }

    /// Publish a snapshot, returning how many subscribers it reached. Never waits.
    ///
    /// Publishing to a closed rig reopens it.
    pub fn publish(&self, rig_id: &str, snapshot: RigSnapshot) -> usize {
        let snapshot = Arc::new(snapshot);
        let capacity = self.capacity;
        let mut channels = self.channels.lock();
        let channel = Broadcaster::channel(&mut channels, rig_id, capacity);
        channel.last = Some(snapshot.clone());
        let sender = channel
            .sender
            .get_or_insert_with(|| broadcast::channel(capacity).0);
        // An error only means nobody is listening right now
        let reached = sender.send(snapshot).unwrap_or(0);
        trace!("Snapshot for {} reached {} subscribers", rig_id, reached);
        reached
    }

    /// Subscribe to a rig's snapshots. The most recent snapshot, if any, is delivered first.
    ///
    /// On a closed rig the subscription yields that last snapshot and then ends.
    pub fn subscribe(&self, rig_id: &str) -> Subscription {
        let mut channels = self.channels.lock();
        let channel = Broadcaster::channel(&mut channels, rig_id, self.capacity);
        let receiver = match &channel.sender {
            Some(sender) => sender.subscribe(),
            // A receiver whose sender is already gone
            None => broadcast::channel(1).1,
        };
        debug!("New subscriber for {}", rig_id);
        Subscription {
            rig_id: rig_id.to_string(),
            pending: channel.last.clone(),
            receiver,
            lagged: 0,
        }
    }

    pub fn latest(&self, rig_id: &str) -> Option<Arc<RigSnapshot>> {
        self.channels
            .lock()
            .get(rig_id)
            .and_then(|channel| channel.last.clone())
    }

    pub fn subscriber_count(&self, rig_id: &str) -> usize {
        self.channels
            .lock()
            .get(rig_id)
            .and_then(|channel| channel.sender.as_ref())
            .map_or(0, |sender| sender.receiver_count())
    }

    /// End every subscription to `rig_id` once its queued snapshots are drained.
    ///
    /// The last snapshot is kept for later subscribers.
    pub fn close(&self, rig_id: &str) -> bool {
        let closed = self
            .channels
            .lock()
            .get_mut(rig_id)
            .and_then(|channel| channel.sender.take())
            .is_some();
        if closed {
            debug!("Closed snapshot channel for {}", rig_id);
        }
        closed
    }
}

/// A finite stream of snapshots for one rig. Subscribe again to restart after it ends.
#[derive(Debug)]
pub struct Subscription {
    rig_id: String,
    pending: Option<Arc<RigSnapshot>>,
    receiver: broadcast::Receiver<Arc<RigSnapshot>>,
    lagged: u64,
}

impl Subscription {
    pub fn rig_id(&self) -> &str {
        &self.rig_id
    }

    /// Snapshots this subscriber missed by falling behind.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    /// `None` once the rig's channel is closed.
    pub async fn next(&mut self) -> Option<Arc<RigSnapshot>> {
        if let Some(snapshot) = self.pending.take() {
            return Some(snapshot);
        }
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(RecvError::Lagged(skipped)) => {
                    self.lagged += skipped;
                    debug!(
                        "Subscriber for {} skipped {} stale snapshots",
                        self.rig_id, skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
