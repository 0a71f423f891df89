//! Payload shapes exchanged with the outside world: the object-created trigger,
//! the stage-to-stage message and the response envelope both stages return.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{PipelineError, Result};
use crate::naming::SequenceNumber;

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<TriggerRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    pub key: String,
}

/// A newly uploaded object named by a trigger record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub container: String,
    pub key: String,
}

impl TriggerEvent {
    pub fn parse(raw: &Value) -> Result<Self> {
        let event: TriggerEvent = serde_json::from_value(raw.clone())
            .map_err(|e| PipelineError::Event(format!("malformed trigger event: {}", e)))?;
        if event.records.is_empty() {
            return Err(PipelineError::Event("trigger event has no records".to_string()));
        }
        Ok(event)
    }

    /// Objects named by the event, keys URL-decoded (`+` is a space).
    pub fn objects(&self) -> Result<Vec<ObjectRef>> {
        self.records
            .iter()
            .map(|r| {
                Ok(ObjectRef {
                    container: r.s3.bucket.name.clone(),
                    key: decode_key(&r.s3.object.key)?,
                })
            })
            .collect()
    }
}

pub fn decode_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| PipelineError::Event(format!("key {:?} is not valid UTF-8: {}", raw, e)))
}

/// Message from the frame extractor to the face identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMessage {
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<SequenceNumber>,
}

impl FrameMessage {
    /// Accepts the message itself or `{ "body": "<json string>" }`.
    pub fn parse(raw: &Value) -> Result<Self> {
        let unwrapped = match raw.get("body") {
            Some(Value::String(body)) => serde_json::from_str::<Value>(body)
                .map_err(|e| PipelineError::Event(format!("body is not JSON: {}", e)))?,
            _ => raw.clone(),
        };
        serde_json::from_value(unwrapped)
            .map_err(|e| PipelineError::Event(format!("malformed frame message: {}", e)))
    }

    /// The typed sequence if the sender supplied one, else parsed from the key.
    pub fn sequence(&self) -> Result<SequenceNumber> {
        match self.sequence {
            Some(seq) => Ok(seq),
            None => SequenceNumber::from_key(&self.key),
        }
    }
}

/// `{ statusCode, body }` where body is itself a JSON document in a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body: body.to_string(),
        }
    }

    pub fn error(err: &PipelineError) -> Self {
        Self::error_with(err, json!({}))
    }

    /// Failure body with extra fields merged in beside `error` and `kind`.
    pub fn error_with(err: &PipelineError, extra: Value) -> Self {
        let mut body = json!({
            "error": err.to_string(),
            "kind": err.kind(),
        });
        if let (Some(target), Value::Object(fields)) = (body.as_object_mut(), extra) {
            target.extend(fields);
        }
        Self {
            status_code: 500,
            body: body.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_keys_are_url_decoded() {
        let raw = json!({
            "Records": [
                { "s3": { "bucket": { "name": "videos" }, "object": { "key": "my+clip_07.mp4" } } },
                { "s3": { "bucket": { "name": "videos" }, "object": { "key": "dir%2Fclip_08.mp4" } } }
            ]
        });
        let objects = TriggerEvent::parse(&raw).unwrap().objects().unwrap();
        assert_eq!(objects[0].key, "my clip_07.mp4");
        assert_eq!(objects[1].key, "dir/clip_08.mp4");
        assert_eq!(objects[1].container, "videos");
    }

    #[test]
    fn trigger_without_records_is_rejected() {
        assert_eq!(TriggerEvent::parse(&json!({})).unwrap_err().kind(), "EventError");
        assert_eq!(
            TriggerEvent::parse(&json!({ "Records": "nope" })).unwrap_err().kind(),
            "EventError"
        );
    }

    #[test]
    fn frame_message_direct_or_wrapped() {
        let direct = FrameMessage::parse(&json!({ "bucket": "frames", "key": "test_07.jpg" })).unwrap();
        assert_eq!(direct.sequence, None);
        assert_eq!(direct.sequence().unwrap(), SequenceNumber(7));

        let wrapped = FrameMessage::parse(&json!({
            "body": "{\"bucket\":\"frames\",\"key\":\"renamed.jpg\",\"sequence\":9}"
        }))
        .unwrap();
        assert_eq!(wrapped.bucket, "frames");
        assert_eq!(wrapped.sequence().unwrap(), SequenceNumber(9));

        assert!(FrameMessage::parse(&json!({ "body": "not json" })).is_err());
        assert!(FrameMessage::parse(&json!({ "bucket": "frames" })).is_err());
    }

    #[test]
    fn message_serializes_without_missing_sequence() {
        let msg = FrameMessage {
            bucket: "frames".into(),
            key: "test_07.jpg".into(),
            sequence: None,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "bucket": "frames", "key": "test_07.jpg" })
        );
    }

    #[test]
    fn response_envelopes() {
        let ok = Response::ok(json!({ "message": "done" }));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({ "statusCode": 200, "body": "{\"message\":\"done\"}" })
        );

        let err = Response::error_with(
            &PipelineError::Event("bad".into()),
            json!({ "frames": ["test_01.jpg"] }),
        );
        assert!(!err.is_success());
        let body = err.body_json().unwrap();
        assert_eq!(body["kind"], "EventError");
        assert_eq!(body["error"], "invalid event: bad");
        assert_eq!(body["frames"][0], "test_01.jpg");
    }
}
