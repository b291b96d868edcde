//! Event types broadcast by the listening engine.
//!
//! | Event | Sender |
//! |-------|--------|
//! | `TranscriptEvent` | consumer loop, per recognizer result |
//! | `ListeningStatusEvent` | listening engine, per state change |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transcript events
// ---------------------------------------------------------------------------

/// Emitted whenever the recognizer produces output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub segments: Vec<TranscriptSegment>,
}

/// A single recognised speech segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    /// Utterance ID, stable across partial→final updates.
    pub id: String,
    pub text: String,
    pub kind: SegmentKind,
    /// Recognizer confidence in [0.0, 1.0], if available.
    pub confidence: Option<f32>,
}

/// Distinguishes streaming partials from committed finals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// Text may change on the next event with the same `id`.
    Partial,
    /// The utterance is complete and will not change.
    Final,
}

// ---------------------------------------------------------------------------
// Listening status events
// ---------------------------------------------------------------------------

/// Emitted when the listening state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningStatusEvent {
    pub status: ListeningStatus,
    /// Optional human-readable detail (e.g. why a start failed).
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListeningStatus {
    /// No capture stream.
    Idle,
    /// A stream open is in flight.
    Starting,
    /// Capturing; chunks flow through the controller.
    Listening,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_event_serializes_with_camel_case_and_lowercase_kind() {
        let event = TranscriptEvent {
            seq: 7,
            segments: vec![TranscriptSegment {
                id: "utt-1".into(),
                text: "hello".into(),
                kind: SegmentKind::Final,
                confidence: Some(0.91),
            }],
        };

        let json = serde_json::to_value(&event).expect("serialize transcript event");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["segments"][0]["kind"], "final");
        let conf = json["segments"][0]["confidence"]
            .as_f64()
            .expect("confidence should serialize as number");
        assert!((conf - 0.91).abs() < 1e-5);

        let back: TranscriptEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.segments[0].kind, SegmentKind::Final);
    }

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = ListeningStatusEvent {
            status: ListeningStatus::Starting,
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "starting");
        assert!(json["detail"].is_null());

        assert!(serde_json::from_str::<ListeningStatus>(r#""Listening""#).is_err());
    }
}
