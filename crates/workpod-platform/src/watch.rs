//! Watch event adapter
//!
//! The control plane streams newline-delimited JSON events. Deletions may
//! carry either the final object or only a `namespace/name` key when the final
//! state is unknown. Both shapes are folded into [`WatchEvent::Deleted`] here
//! so consumers never inspect raw payloads.

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Deserialize;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::trace;

use crate::error::ControlPlaneError;
use crate::types::{InstanceKey, ObjectMeta, WorkspaceInstance};

/// Longest single event line accepted from a watch stream
pub const MAX_WATCH_LINE: usize = 16 * 1024 * 1024;

/// Stream of decoded watch events
pub type WatchStream = BoxStream<'static, Result<WatchEvent, ControlPlaneError>>;

/// A change to one workspace instance
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(WorkspaceInstance),
    Modified(WorkspaceInstance),
    Deleted(Tombstone),
}

impl WatchEvent {
    pub fn key(&self) -> InstanceKey {
        match self {
            WatchEvent::Added(instance) | WatchEvent::Modified(instance) => instance.key(),
            WatchEvent::Deleted(tombstone) => tombstone.key.clone(),
        }
    }
}

/// What is left of a deleted instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub key: InstanceKey,
    /// Absent when the final state was not observed
    pub uid: Option<String>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawTombstone {
    #[serde(default)]
    metadata: Option<ObjectMeta>,
    #[serde(default)]
    key: Option<String>,
}

#[derive(Deserialize)]
struct RawStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: u16,
}

/// Decode one event line; `Ok(None)` for events that carry no change
pub fn decode_event(line: &str) -> Result<Option<WatchEvent>, ControlPlaneError> {
    let raw: RawEvent = serde_json::from_str(line)?;

    match raw.type_.as_str() {
        "ADDED" => Ok(Some(WatchEvent::Added(serde_json::from_value(raw.object)?))),
        "MODIFIED" => Ok(Some(WatchEvent::Modified(serde_json::from_value(
            raw.object,
        )?))),
        "DELETED" => decode_tombstone(raw.object).map(|t| Some(WatchEvent::Deleted(t))),
        "BOOKMARK" => Ok(None),
        "ERROR" => {
            let status: RawStatus = serde_json::from_value(raw.object)?;
            Err(ControlPlaneError::Watch(format!(
                "{} ({})",
                status.message, status.code
            )))
        }
        other => {
            trace!("Ignoring watch event of type {}", other);
            Ok(None)
        }
    }
}

fn decode_tombstone(object: serde_json::Value) -> Result<Tombstone, ControlPlaneError> {
    let raw: RawTombstone = serde_json::from_value(object)?;

    if let Some(metadata) = raw.metadata {
        return Ok(Tombstone {
            key: InstanceKey::new(&metadata.namespace, &metadata.name),
            uid: Some(metadata.uid).filter(|uid| !uid.is_empty()),
        });
    }

    let key = raw
        .key
        .ok_or_else(|| ControlPlaneError::Watch("deletion without object or key".to_string()))?;
    let (namespace, name) = key
        .split_once('/')
        .ok_or_else(|| ControlPlaneError::Watch(format!("malformed deletion key {}", key)))?;

    Ok(Tombstone {
        key: InstanceKey::new(namespace, name),
        uid: None,
    })
}

/// Decode a newline-delimited event body into a [`WatchStream`]
pub fn decode_ndjson<S>(body: S) -> WatchStream
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
{
    let lines = FramedRead::new(
        StreamReader::new(body),
        LinesCodec::new_with_max_length(MAX_WATCH_LINE),
    );

    lines
        .filter_map(|line| {
            let event = match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => decode_event(&line).transpose(),
                Err(e) => Some(Err(ControlPlaneError::Watch(e.to_string()))),
            };
            futures::future::ready(event)
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_and_modified() {
        let added = decode_event(
            r#"{"type":"ADDED","object":{"metadata":{"name":"a","namespace":"p-x","uid":"u1"}}}"#,
        )
        .unwrap()
        .unwrap();
        assert!(matches!(&added, WatchEvent::Added(i) if i.metadata.uid == "u1"));
        assert_eq!(added.key(), InstanceKey::new("p-x", "a"));

        let modified = decode_event(
            r#"{"type":"MODIFIED","object":{"metadata":{"name":"a","namespace":"p-x"},"status":{"phase":"Ready"}}}"#,
        )
        .unwrap()
        .unwrap();
        assert!(matches!(modified, WatchEvent::Modified(_)));
    }

    #[test]
    fn test_deleted_with_final_object() {
        let event = decode_event(
            r#"{"type":"DELETED","object":{"metadata":{"name":"a","namespace":"p-x","uid":"u1"}}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            event,
            WatchEvent::Deleted(Tombstone {
                key: InstanceKey::new("p-x", "a"),
                uid: Some("u1".to_string()),
            })
        );
    }

    #[test]
    fn test_deleted_with_unknown_final_state() {
        let event = decode_event(r#"{"type":"DELETED","object":{"key":"p-x/a"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            WatchEvent::Deleted(Tombstone {
                key: InstanceKey::new("p-x", "a"),
                uid: None,
            })
        );

        assert!(decode_event(r#"{"type":"DELETED","object":{"key":"nokey"}}"#).is_err());
    }

    #[test]
    fn test_bookmark_and_error() {
        assert!(decode_event(r#"{"type":"BOOKMARK","object":{}}"#)
            .unwrap()
            .is_none());
        let err = decode_event(
            r#"{"type":"ERROR","object":{"message":"too old resource version","code":410}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("410"));
    }

    #[tokio::test]
    async fn test_ndjson_split_across_chunks() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(
                b"{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"name\":\"a\",",
            )),
            Ok(Bytes::from_static(
                b"\"namespace\":\"p-x\"}}}\n\n{\"type\":\"DELETED\",\"object\":{\"key\":\"p-x/a\"}}\n",
            )),
        ];

        let events: Vec<_> = decode_ndjson(futures::stream::iter(chunks))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(WatchEvent::Added(_))));
        assert!(matches!(events[1], Ok(WatchEvent::Deleted(_))));
    }
}
