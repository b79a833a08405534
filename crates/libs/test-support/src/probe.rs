use pairsync::{ErrorReporter, SyncError};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collects every value a listener is invoked with.
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
    notify: Arc<Mutex<mpsc::Sender<()>>>,
    wake: Mutex<mpsc::Receiver<()>>,
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            notify: Arc::new(Mutex::new(tx)),
            wake: Mutex::new(rx),
        }
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        let notify = Arc::clone(&self.notify);
        move |value: &T| {
            seen.lock().expect("recorder poisoned").push(value.clone());
            let _ = notify.lock().expect("recorder notify poisoned").send(());
        }
    }

    pub fn values(&self) -> Vec<T> {
        self.seen.lock().expect("recorder poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().expect("recorder poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until at least `count` values arrived, for listeners running on
    /// another executor.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<T> {
        let wake = self.wake.lock().expect("recorder wake poisoned");
        while self.len() < count {
            if wake.recv_timeout(timeout).is_err() {
                break;
            }
        }
        self.values()
    }
}

/// Error reporter that keeps everything it is handed.
#[derive(Default)]
pub struct CollectingReporter {
    reported: Mutex<Vec<SyncError>>,
}

impl CollectingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reported(&self) -> Vec<SyncError> {
        self.reported.lock().expect("reporter poisoned").clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, error: &SyncError) {
        log::debug!("collected {}: {error}", error.code());
        self.reported.lock().expect("reporter poisoned").push(error.clone());
    }
}
