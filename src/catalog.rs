//! Catalog of clips played when the device fires, and the seeded picker
//! that chooses among them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A clip the poller can play in response to a device event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub url: &'static str,
    pub duration: Duration,
}

pub const MESSAGES: &[Message] = &[
    Message {
        url: "https://www.youtube.com/watch?v=glNjsOHiBYs",
        duration: Duration::from_secs(32),
    },
    Message {
        url: "https://www.youtube.com/watch?v=-M3v8NXhPD4",
        duration: Duration::from_secs(11),
    },
    Message {
        url: "https://youtu.be/FQwdy2wPpjU?t=8s",
        duration: Duration::from_secs(30),
    },
];

/// Picks catalog entries with one generator seeded at start-up.
#[derive(Clone)]
pub struct MessagePicker {
    rng: Arc<Mutex<StdRng>>,
}

impl MessagePicker {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn pick(&self) -> Message {
        // A poisoned lock still holds a usable generator.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        MESSAGES[rng.gen_range(0..MESSAGES.len())]
    }
}
