use pairsync::{PeerTransport, RawPayload, TransferId, TransportError};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scripted peer transport. Realtime and context calls pop queued results
/// and succeed once the script is empty; every outbound call is recorded.
pub struct MockTransport {
    supported: bool,
    reachable: AtomicBool,
    paired: AtomicBool,
    app_installed: AtomicBool,
    realtime_results: Mutex<VecDeque<Result<RawPayload, TransportError>>>,
    context_results: Mutex<VecDeque<Result<(), TransportError>>>,
    received_context: Mutex<Option<RawPayload>>,
    realtime_sent: Mutex<Vec<RawPayload>>,
    durable_sent: Mutex<Vec<(TransferId, RawPayload)>>,
    files_sent: Mutex<Vec<(TransferId, PathBuf, Option<RawPayload>)>>,
    contexts_set: Mutex<Vec<RawPayload>>,
    activate_calls: AtomicUsize,
    next_id: AtomicU64,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::with_support(true)
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unsupported() -> Self {
        Self::with_support(false)
    }

    fn with_support(supported: bool) -> Self {
        Self {
            supported,
            reachable: AtomicBool::new(true),
            paired: AtomicBool::new(true),
            app_installed: AtomicBool::new(true),
            realtime_results: Mutex::new(VecDeque::new()),
            context_results: Mutex::new(VecDeque::new()),
            received_context: Mutex::new(None),
            realtime_sent: Mutex::new(Vec::new()),
            durable_sent: Mutex::new(Vec::new()),
            files_sent: Mutex::new(Vec::new()),
            contexts_set: Mutex::new(Vec::new()),
            activate_calls: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_paired(&self, paired: bool) {
        self.paired.store(paired, Ordering::SeqCst);
    }

    pub fn set_app_installed(&self, installed: bool) {
        self.app_installed.store(installed, Ordering::SeqCst);
    }

    pub fn push_realtime_result(&self, result: Result<RawPayload, TransportError>) {
        self.realtime_results.lock().expect("realtime script poisoned").push_back(result);
    }

    pub fn push_context_result(&self, result: Result<(), TransportError>) {
        self.context_results.lock().expect("context script poisoned").push_back(result);
    }

    pub fn set_received_context(&self, context: Option<RawPayload>) {
        *self.received_context.lock().expect("received context poisoned") = context;
    }

    pub fn realtime_sent(&self) -> Vec<RawPayload> {
        self.realtime_sent.lock().expect("realtime log poisoned").clone()
    }

    pub fn durable_sent(&self) -> Vec<(TransferId, RawPayload)> {
        self.durable_sent.lock().expect("durable log poisoned").clone()
    }

    pub fn files_sent(&self) -> Vec<(TransferId, PathBuf, Option<RawPayload>)> {
        self.files_sent.lock().expect("file log poisoned").clone()
    }

    pub fn contexts_set(&self) -> Vec<RawPayload> {
        self.contexts_set.lock().expect("context log poisoned").clone()
    }

    pub fn activate_calls(&self) -> usize {
        self.activate_calls.load(Ordering::SeqCst)
    }

    /// Number of outbound delivery calls of any kind.
    pub fn outbound_calls(&self) -> usize {
        self.realtime_sent().len()
            + self.durable_sent().len()
            + self.files_sent().len()
            + self.contexts_set().len()
    }

    fn issue_id(&self) -> TransferId {
        TransferId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl PeerTransport for MockTransport {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn activate(&self) {
        self.activate_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn is_paired(&self) -> bool {
        self.paired.load(Ordering::SeqCst)
    }

    fn is_app_installed(&self) -> bool {
        self.app_installed.load(Ordering::SeqCst)
    }

    fn send_realtime(&self, payload: &RawPayload) -> Result<RawPayload, TransportError> {
        self.realtime_sent.lock().expect("realtime log poisoned").push(payload.clone());
        self.realtime_results
            .lock()
            .expect("realtime script poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(RawPayload::new()))
    }

    fn enqueue_durable(&self, payload: &RawPayload) -> TransferId {
        let id = self.issue_id();
        self.durable_sent.lock().expect("durable log poisoned").push((id, payload.clone()));
        id
    }

    fn transfer_file(&self, path: &Path, metadata: Option<&RawPayload>) -> TransferId {
        let id = self.issue_id();
        self.files_sent.lock().expect("file log poisoned").push((
            id,
            path.to_path_buf(),
            metadata.cloned(),
        ));
        id
    }

    fn set_application_context(&self, context: &RawPayload) -> Result<(), TransportError> {
        self.contexts_set.lock().expect("context log poisoned").push(context.clone());
        self.context_results.lock().expect("context script poisoned").pop_front().unwrap_or(Ok(()))
    }

    fn received_application_context(&self) -> Option<RawPayload> {
        self.received_context.lock().expect("received context poisoned").clone()
    }
}
