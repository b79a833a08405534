mod arena;
mod executor;

pub use arena::SlotKey;
pub use executor::{Executor, Inline, Job, SerialQueue, TokioExecutor};

use crate::message::RawPayload;
use crate::registry::{DecodedMessage, KindId};
use crate::transport::ReceivedFile;
use arena::Arena;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pool {
    Typed,
    Raw,
    Context,
    File,
}

struct HandleInner {
    pool: Pool,
    slot: SlotKey,
    released: AtomicBool,
}

impl HandleInner {
    fn is_live(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }
}

/// Keeps a listener registered. Clones share ownership; once every clone is
/// dropped the listener is never invoked again.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    pub fn pool(&self) -> Pool {
        self.inner.pool
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_live()
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("pool", &self.inner.pool)
            .field("slot", &self.inner.slot)
            .field("active", &self.is_active())
            .finish()
    }
}

pub(crate) type TypedListener = Arc<dyn Fn(&DecodedMessage) + Send + Sync>;
pub(crate) type PayloadListener = Arc<dyn Fn(&RawPayload) + Send + Sync>;
pub(crate) type FileListener = Arc<dyn Fn(&ReceivedFile) + Send + Sync>;

struct Entry<L> {
    owner: Weak<HandleInner>,
    executor: Arc<dyn Executor>,
    listener: L,
}

impl<L> Entry<L> {
    fn is_live(&self) -> bool {
        self.owner.upgrade().is_some_and(|owner| owner.is_live())
    }
}

struct TypedEntry {
    filter: Option<KindId>,
    listener: TypedListener,
}

/// A listener invocation collected under the engine lock, to be handed to its
/// executor after the lock is released.
pub struct Scheduled {
    executor: Arc<dyn Executor>,
    job: Job,
}

impl Scheduled {
    pub fn run(self) {
        self.executor.execute(self.job);
    }
}

pub fn run_all(scheduled: Vec<Scheduled>) {
    for item in scheduled {
        item.run();
    }
}

fn guarded(owner: Weak<HandleInner>, call: impl FnOnce() + Send + 'static) -> Job {
    Box::new(move || {
        if !owner.upgrade().is_some_and(|owner| owner.is_live()) {
            return;
        }
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(call)) {
            log::error!("subscription listener panicked: {}", panic_message(panic.as_ref()));
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

struct ListenerPool<L> {
    pool: Pool,
    entries: Arena<Entry<L>>,
}

impl<L: Clone> ListenerPool<L> {
    fn new(pool: Pool) -> Self {
        Self { pool, entries: Arena::default() }
    }

    fn insert(&mut self, executor: Arc<dyn Executor>, listener: L) -> SubscriptionHandle {
        self.compact();
        let pool = self.pool;
        self.entries.insert_with(|slot| {
            let inner = Arc::new(HandleInner { pool, slot, released: AtomicBool::new(false) });
            let entry = Entry { owner: Arc::downgrade(&inner), executor, listener };
            (entry, SubscriptionHandle { inner })
        })
    }

    fn remove(&mut self, handle: &SubscriptionHandle) -> bool {
        let slot = handle.inner.slot;
        let owned = self
            .entries
            .get(slot)
            .is_some_and(|entry| std::ptr::eq(entry.owner.as_ptr(), Arc::as_ptr(&handle.inner)));
        if !owned {
            return false;
        }
        handle.inner.released.store(true, Ordering::Release);
        self.entries.remove(slot).is_some()
    }

    fn compact(&mut self) -> usize {
        let removed = self.entries.retain(Entry::is_live);
        if removed > 0 {
            log::trace!("pruned {removed} dead {:?} subscriptions", self.pool);
        }
        removed
    }

    fn schedule<F>(&mut self, mut select: F) -> Vec<Scheduled>
    where
        F: FnMut(&L) -> Option<Job>,
    {
        self.compact();
        self.entries
            .values()
            .filter_map(|entry| {
                let call = select(&entry.listener)?;
                Some(Scheduled {
                    executor: Arc::clone(&entry.executor),
                    job: guarded(entry.owner.clone(), call),
                })
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Four independently pruned listener pools.
pub struct SubscriptionRegistry {
    typed: ListenerPool<Arc<TypedEntry>>,
    raw: ListenerPool<PayloadListener>,
    context: ListenerPool<PayloadListener>,
    files: ListenerPool<FileListener>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self {
            typed: ListenerPool::new(Pool::Typed),
            raw: ListenerPool::new(Pool::Raw),
            context: ListenerPool::new(Pool::Context),
            files: ListenerPool::new(Pool::File),
        }
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe_typed(
        &mut self,
        filter: Option<KindId>,
        executor: Arc<dyn Executor>,
        listener: TypedListener,
    ) -> SubscriptionHandle {
        self.typed.insert(executor, Arc::new(TypedEntry { filter, listener }))
    }

    pub(crate) fn subscribe_raw(
        &mut self,
        executor: Arc<dyn Executor>,
        listener: PayloadListener,
    ) -> SubscriptionHandle {
        self.raw.insert(executor, listener)
    }

    pub(crate) fn subscribe_context(
        &mut self,
        executor: Arc<dyn Executor>,
        listener: PayloadListener,
    ) -> SubscriptionHandle {
        self.context.insert(executor, listener)
    }

    pub(crate) fn subscribe_files(
        &mut self,
        executor: Arc<dyn Executor>,
        listener: FileListener,
    ) -> SubscriptionHandle {
        self.files.insert(executor, listener)
    }

    /// Eagerly removes the handle's entry. Handles from another registry, or
    /// whose slot has since been reused, are ignored.
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> bool {
        match handle.pool() {
            Pool::Typed => self.typed.remove(handle),
            Pool::Raw => self.raw.remove(handle),
            Pool::Context => self.context.remove(handle),
            Pool::File => self.files.remove(handle),
        }
    }

    pub fn dispatch_typed(&mut self, message: &DecodedMessage) -> Vec<Scheduled> {
        let kind = message.kind();
        self.typed.schedule(|entry| {
            if entry.filter.is_some_and(|filter| filter != kind) {
                return None;
            }
            let entry = Arc::clone(entry);
            let message = message.clone();
            Some(Box::new(move || (entry.listener)(&message)) as Job)
        })
    }

    pub fn dispatch_raw(&mut self, payload: &RawPayload) -> Vec<Scheduled> {
        Self::dispatch_payload(&mut self.raw, payload)
    }

    pub fn dispatch_context(&mut self, context: &RawPayload) -> Vec<Scheduled> {
        Self::dispatch_payload(&mut self.context, context)
    }

    /// Schedules a single context listener, used to replay the last known
    /// context to a new subscriber.
    pub fn replay_context(
        &self,
        handle: &SubscriptionHandle,
        context: &RawPayload,
    ) -> Option<Scheduled> {
        let entry = self.context.entries.get(handle.inner.slot)?;
        let listener = Arc::clone(&entry.listener);
        let context = context.clone();
        Some(Scheduled {
            executor: Arc::clone(&entry.executor),
            job: guarded(entry.owner.clone(), move || listener(&context)),
        })
    }

    pub fn dispatch_file(&mut self, file: &ReceivedFile) -> Vec<Scheduled> {
        self.files.schedule(|listener| {
            let listener = Arc::clone(listener);
            let file = file.clone();
            Some(Box::new(move || listener(&file)) as Job)
        })
    }

    fn dispatch_payload(
        pool: &mut ListenerPool<PayloadListener>,
        payload: &RawPayload,
    ) -> Vec<Scheduled> {
        pool.schedule(|listener| {
            let listener = Arc::clone(listener);
            let payload = payload.clone();
            Some(Box::new(move || listener(&payload)) as Job)
        })
    }

    pub fn compact(&mut self) -> usize {
        self.typed.compact() + self.raw.compact() + self.context.compact() + self.files.compact()
    }

    pub fn len(&self, pool: Pool) -> usize {
        match pool {
            Pool::Typed => self.typed.len(),
            Pool::Raw => self.raw.len(),
            Pool::Context => self.context.len(),
            Pool::File => self.files.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{run_all, Executor, Inline, Pool, SubscriptionRegistry};
    use crate::codec::Codec;
    use crate::message::{RawPayload, SyncMessage};
    use crate::registry::{DecodedMessage, KindId, TypeRegistry};
    use crate::transport::ReceivedFile;
    use serde::{Deserialize, Serialize};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping(u32);

    impl SyncMessage for Ping {}

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Pong(u32);

    impl SyncMessage for Pong {}

    fn inline() -> Arc<dyn Executor> {
        Arc::new(Inline)
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Arc<dyn Fn(&RawPayload) + Send + Sync>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = Arc::new(move |payload: &RawPayload| {
            sink.lock().expect("recorder mutex poisoned").extend(payload.keys().cloned());
        });
        (seen, listener)
    }

    fn payload(key: &str) -> RawPayload {
        let mut payload = RawPayload::new();
        payload.insert(key.to_owned(), serde_json::Value::Bool(true));
        payload
    }

    #[test]
    fn dropped_handle_is_pruned_on_next_dispatch() {
        let mut registry = SubscriptionRegistry::new();
        let (seen, listener) = recorder();
        let handle = registry.subscribe_raw(inline(), listener);
        run_all(registry.dispatch_raw(&payload("a")));
        drop(handle);
        run_all(registry.dispatch_raw(&payload("b")));
        assert_eq!(*seen.lock().expect("recorder mutex poisoned"), vec!["a"]);
        assert_eq!(registry.len(Pool::Raw), 0);
    }

    #[test]
    fn clones_keep_subscription_alive() {
        let mut registry = SubscriptionRegistry::new();
        let (seen, listener) = recorder();
        let handle = registry.subscribe_raw(inline(), listener);
        let clone = handle.clone();
        drop(handle);
        run_all(registry.dispatch_raw(&payload("kept")));
        assert_eq!(seen.lock().expect("recorder mutex poisoned").len(), 1);
        assert!(clone.is_active());
    }

    #[test]
    fn listener_released_after_scheduling_is_skipped() {
        let mut registry = SubscriptionRegistry::new();
        let (seen, listener) = recorder();
        let handle = registry.subscribe_raw(inline(), listener);
        let scheduled = registry.dispatch_raw(&payload("late"));
        drop(handle);
        run_all(scheduled);
        assert!(seen.lock().expect("recorder mutex poisoned").is_empty());
    }

    #[test]
    fn unsubscribe_removes_eagerly_and_ignores_foreign_handles() {
        let mut registry = SubscriptionRegistry::new();
        let mut other = SubscriptionRegistry::new();
        let (_, listener) = recorder();
        let handle = registry.subscribe_context(inline(), Arc::clone(&listener));
        let foreign = other.subscribe_context(inline(), listener);
        assert!(registry.unsubscribe(&handle));
        assert!(!handle.is_active());
        assert!(!registry.unsubscribe(&handle));
        assert_eq!(registry.len(Pool::Context), 0);
        assert!(!registry.unsubscribe(&foreign));
        assert!(foreign.is_active());
        assert_eq!(other.len(Pool::Context), 1);
    }

    #[test]
    fn typed_dispatch_respects_kind_filter() {
        let mut kinds = TypeRegistry::new();
        kinds.register::<Ping>().expect("register");
        kinds.register::<Pong>().expect("register");
        let mut registry = SubscriptionRegistry::new();
        let pings = Arc::new(Mutex::new(0));
        let everything = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&pings);
        let _ping = registry.subscribe_typed(
            Some(KindId::of::<Ping>()),
            inline(),
            Arc::new(move |message: &DecodedMessage| {
                assert!(message.downcast_ref::<Ping>().is_some());
                *counter.lock().expect("counter mutex poisoned") += 1;
            }),
        );
        let counter = Arc::clone(&everything);
        let _all = registry.subscribe_typed(
            None,
            inline(),
            Arc::new(move |_: &DecodedMessage| {
                *counter.lock().expect("counter mutex poisoned") += 1;
            }),
        );

        for payload in [
            Codec::default().encode(&Ping(1)).expect("encode"),
            Codec::default().encode(&Pong(2)).expect("encode"),
        ] {
            let decoded = kinds.try_decode(&payload).decoded.expect("decoded");
            run_all(registry.dispatch_typed(&decoded));
        }
        assert_eq!(*pings.lock().expect("counter mutex poisoned"), 1);
        assert_eq!(*everything.lock().expect("counter mutex poisoned"), 2);
    }

    #[test]
    fn subscribing_prunes_dead_entries_without_dispatch() {
        let mut registry = SubscriptionRegistry::new();
        for _ in 0..16 {
            let handle = registry.subscribe_files(inline(), Arc::new(|_: &ReceivedFile| {}));
            drop(handle);
        }
        assert_eq!(registry.len(Pool::File), 1);

        let _live = registry.subscribe_files(inline(), Arc::new(|_: &ReceivedFile| {}));
        assert_eq!(registry.len(Pool::File), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let mut registry = SubscriptionRegistry::new();
        let _bad =
            registry.subscribe_files(inline(), Arc::new(|_: &ReceivedFile| panic!("listener bug")));
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let _good = registry.subscribe_files(
            inline(),
            Arc::new(move |_: &ReceivedFile| {
                *counter.lock().expect("counter mutex poisoned") += 1;
            }),
        );
        let file = ReceivedFile { path: "/tmp/a.gpx".into(), metadata: None };
        run_all(registry.dispatch_file(&file));
        assert_eq!(*hits.lock().expect("counter mutex poisoned"), 1);
    }
}
