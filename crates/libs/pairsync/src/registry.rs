use crate::codec::{Codec, CodecError};
use crate::error::SyncError;
use crate::message::{RawPayload, SyncMessage};
use serde_json::Value as JsonValue;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KindId(TypeId);

impl KindId {
    pub fn of<T: SyncMessage>() -> Self {
        Self(TypeId::of::<T>())
    }
}

impl fmt::Debug for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KindId").field(&self.0).finish()
    }
}

type DecodeFn = fn(&str, &JsonValue) -> Result<Arc<dyn Any + Send + Sync>, CodecError>;

#[derive(Clone)]
pub struct MessageKind {
    id: KindId,
    key: String,
    type_name: &'static str,
    decode: DecodeFn,
}

impl MessageKind {
    fn of<T: SyncMessage>() -> Self {
        Self {
            id: KindId::of::<T>(),
            key: T::kind_key(),
            type_name: std::any::type_name::<T>(),
            decode: decode_as::<T>,
        }
    }

    pub fn id(&self) -> KindId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageKind")
            .field("key", &self.key)
            .field("type_name", &self.type_name)
            .finish()
    }
}

fn decode_as<T: SyncMessage>(
    key: &str,
    value: &JsonValue,
) -> Result<Arc<dyn Any + Send + Sync>, CodecError> {
    let message: T = Codec::decode_entry(key, value)?;
    Ok(Arc::new(message))
}

/// A successfully decoded inbound message, tagged with its kind.
#[derive(Clone)]
pub struct DecodedMessage {
    kind: KindId,
    key: String,
    value: Arc<dyn Any + Send + Sync>,
}

impl DecodedMessage {
    pub fn kind(&self) -> KindId {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn downcast_ref<T: SyncMessage>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Shares the decoded value without copying it.
    pub fn downcast<T: SyncMessage>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl fmt::Debug for DecodedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedMessage").field("key", &self.key).finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct DecodeAttempt {
    pub decoded: Option<DecodedMessage>,
    pub failures: Vec<SyncError>,
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    kinds: Vec<MessageKind>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T`. Re-registering the same type is a no-op; a different
    /// type claiming an already-registered key is rejected.
    pub fn register<T: SyncMessage>(&mut self) -> Result<KindId, SyncError> {
        let kind = MessageKind::of::<T>();
        if let Some(existing) = self.kinds.iter().find(|known| known.key == kind.key) {
            if existing.id == kind.id {
                return Ok(kind.id);
            }
            return Err(SyncError::KindKeyCollision {
                key: kind.key,
                existing: existing.type_name,
            });
        }
        log::debug!("registered message kind {} as {:?}", kind.type_name, kind.key);
        let id = kind.id;
        self.kinds.push(kind);
        Ok(id)
    }

    pub fn contains(&self, id: KindId) -> bool {
        self.kinds.iter().any(|kind| kind.id == id)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn kinds(&self) -> &[MessageKind] {
        &self.kinds
    }

    pub fn try_decode(&self, payload: &RawPayload) -> DecodeAttempt {
        decode_with(&self.kinds, payload)
    }
}

/// Tries `kinds` in order; the first kind whose key is present and whose body
/// decodes wins. Failed bodies are collected and the search continues.
pub fn decode_with(kinds: &[MessageKind], payload: &RawPayload) -> DecodeAttempt {
    let mut attempt = DecodeAttempt::default();
    for kind in kinds {
        let Some(value) = payload.get(&kind.key) else {
            continue;
        };
        match (kind.decode)(&kind.key, value) {
            Ok(value) => {
                attempt.decoded =
                    Some(DecodedMessage { kind: kind.id, key: kind.key.clone(), value });
                break;
            }
            Err(err) => attempt.failures.push(SyncError::DecodeFailed {
                key: kind.key.clone(),
                reason: err.to_string(),
            }),
        }
    }
    attempt
}
