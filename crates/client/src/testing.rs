//! In-memory transport and counting scheduler for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;

use crate::supervisor::Generation;
use crate::timer::{Scheduler, TimerHandle, TimerId, TokioScheduler};
use crate::transport::{
    connection, ConnectionHandle, ConnectionLink, EventSender, EventSink, Transport,
    TransportEvent, TransportMessage,
};

#[derive(Default)]
struct MockState {
    urls: Vec<Url>,
    links: HashMap<Generation, ConnectionLink>,
    senders: HashMap<Generation, EventSender>,
}

/// Transport whose connections are driven by the test.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().urls.len()
    }

    pub fn last_url(&self) -> Option<Url> {
        self.state.lock().unwrap().urls.last().cloned()
    }

    /// Take the transport half of connection `generation`.
    pub fn link(&self, generation: Generation) -> ConnectionLink {
        self.state
            .lock()
            .unwrap()
            .links
            .remove(&generation)
            .unwrap_or_else(|| panic!("no connection opened for generation {}", generation))
    }

    /// Deliver an event as if connection `generation` produced it, even
    /// after its link is gone.
    pub fn inject(&self, generation: Generation, event: TransportEvent) {
        let sender = self
            .state
            .lock()
            .unwrap()
            .senders
            .get(&generation)
            .cloned()
            .unwrap_or_else(|| panic!("no connection opened for generation {}", generation));
        sender.deliver(TransportMessage { generation, event });
    }
}

impl Transport for MockTransport {
    fn open(&mut self, url: &Url, generation: Generation, events: EventSender) -> ConnectionHandle {
        let (handle, link) = connection(generation, Arc::clone(&events));
        let mut state = self.state.lock().unwrap();
        state.urls.push(url.clone());
        state.links.insert(generation, link);
        state.senders.insert(generation, events);
        handle
    }
}

/// Real tokio timers, with a count of how many were scheduled.
#[derive(Clone, Default)]
pub struct CountingScheduler {
    scheduled: Arc<AtomicUsize>,
}

impl CountingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }
}

impl Scheduler for CountingScheduler {
    fn schedule(
        &mut self,
        delay: Duration,
        id: TimerId,
        fired: mpsc::UnboundedSender<TimerId>,
    ) -> TimerHandle {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        TokioScheduler.schedule(delay, id, fired)
    }
}

/// Let every ready task run. Time must be paused.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
