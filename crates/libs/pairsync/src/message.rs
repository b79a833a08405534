use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Untyped wire unit exchanged with the peer.
pub type RawPayload = BTreeMap<String, JsonValue>;

/// A message type that can be sent to and received from the peer.
///
/// The kind key names the payload entry the encoded body is stored under, so
/// it must stay stable across releases of both peers. The default is the type
/// name with module paths removed (`Ping`, `Envelope<Ping>`).
pub trait SyncMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn kind_key() -> String {
        short_type_name(std::any::type_name::<Self>())
    }
}

pub(crate) fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    for ch in full.chars() {
        match ch {
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                out.push_str(last_path_segment(&segment));
                segment.clear();
                out.push(ch);
            }
            _ => segment.push(ch),
        }
    }
    out.push_str(last_path_segment(&segment));
    out
}

fn last_path_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::{short_type_name, SyncMessage};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Heartbeat {
        beat: u32,
    }

    impl SyncMessage for Heartbeat {}

    #[derive(Serialize, Deserialize)]
    struct Renamed;

    impl SyncMessage for Renamed {
        fn kind_key() -> String {
            "workout.v2".to_owned()
        }
    }

    #[test]
    fn default_kind_key_strips_module_path() {
        assert_eq!(Heartbeat::kind_key(), "Heartbeat");
    }

    #[test]
    fn kind_key_can_be_overridden() {
        assert_eq!(Renamed::kind_key(), "workout.v2");
    }

    #[test]
    fn generic_arguments_keep_their_short_names() {
        assert_eq!(
            short_type_name("app::sync::Envelope<app::model::Workout, alloc::string::String>"),
            "Envelope<Workout, String>"
        );
        assert_eq!(short_type_name("core::option::Option<[u8; 4]>"), "Option<[u8; 4]>");
    }
}
