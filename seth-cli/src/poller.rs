//! Background poll thread: drives the node at a steady interval, taking the
//! same lock as the command shell so only one caller touches engine state at
//! a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use seth_core::{PexNode, PollEvent};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct Poller {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn spawn(node: Arc<Mutex<PexNode>>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::spawn(move || {
            while flag.load(Ordering::Relaxed) {
                let events = {
                    let mut node = node.lock().expect("node lock poisoned");
                    node.poll()
                };
                for event in events {
                    match event {
                        PollEvent::DeliveryFailed { peer, packet_id } => {
                            warn!(%peer, packet_id, "message delivery failed");
                            println!("Delivery to {peer} failed (packet {packet_id})");
                        }
                    }
                }
                thread::sleep(POLL_INTERVAL);
            }
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
