//! Inbound signal contract: names and JSON payloads accepted by a project.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::{Annotation, DesignBrief, PhotoKind, ScanData};
use crate::runtime::CANCEL_SIGNAL;

pub const PHOTO_ADDED: &str = "photoAdded";
pub const PHOTOS_CONFIRMED: &str = "photosConfirmed";
pub const SCAN_COMPLETED: &str = "scanCompleted";
pub const SCAN_SKIPPED: &str = "scanSkipped";
pub const INTAKE_COMPLETED: &str = "intakeCompleted";
pub const INTAKE_SKIPPED: &str = "intakeSkipped";
pub const OPTION_SELECTED: &str = "optionSelected";
pub const START_OVER: &str = "startOver";
pub const ANNOTATION_EDIT: &str = "annotationEdit";
pub const TEXT_FEEDBACK: &str = "textFeedback";
pub const APPROVE: &str = "approve";
pub const RETRY: &str = "retry";
pub const CANCEL: &str = "cancel";

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectSignal {
    PhotoAdded { reference: String, kind: PhotoKind },
    PhotosConfirmed,
    ScanCompleted(ScanData),
    ScanSkipped,
    IntakeCompleted(DesignBrief),
    IntakeSkipped,
    /// Signed so that negative indexes from a client parse and are reported.
    OptionSelected { index: i64 },
    StartOver,
    AnnotationEdit { annotations: Vec<Annotation> },
    TextFeedback { text: String },
    Approve,
    Retry,
    /// User cancellation; ends in `abandoned`.
    Cancel,
    /// Operator cancellation through the runtime; ends in `cancelled`.
    Terminate { reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("unknown signal '{0}'")]
    Unknown(String),
    #[error("malformed payload for '{signal}': {reason}")]
    MalformedPayload { signal: &'static str, reason: String },
}

#[derive(Serialize, Deserialize)]
struct PhotoPayload {
    reference: String,
    kind: PhotoKind,
}

#[derive(Serialize, Deserialize)]
struct SelectionPayload {
    index: i64,
}

#[derive(Serialize, Deserialize)]
struct AnnotationPayload {
    annotations: Vec<Annotation>,
}

#[derive(Serialize, Deserialize)]
struct FeedbackPayload {
    text: String,
}

fn decode<T: DeserializeOwned>(signal: &'static str, data: &str) -> Result<T, SignalError> {
    serde_json::from_str(data).map_err(|e| SignalError::MalformedPayload {
        signal,
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

impl ProjectSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ProjectSignal::PhotoAdded { .. } => PHOTO_ADDED,
            ProjectSignal::PhotosConfirmed => PHOTOS_CONFIRMED,
            ProjectSignal::ScanCompleted(_) => SCAN_COMPLETED,
            ProjectSignal::ScanSkipped => SCAN_SKIPPED,
            ProjectSignal::IntakeCompleted(_) => INTAKE_COMPLETED,
            ProjectSignal::IntakeSkipped => INTAKE_SKIPPED,
            ProjectSignal::OptionSelected { .. } => OPTION_SELECTED,
            ProjectSignal::StartOver => START_OVER,
            ProjectSignal::AnnotationEdit { .. } => ANNOTATION_EDIT,
            ProjectSignal::TextFeedback { .. } => TEXT_FEEDBACK,
            ProjectSignal::Approve => APPROVE,
            ProjectSignal::Retry => RETRY,
            ProjectSignal::Cancel => CANCEL,
            ProjectSignal::Terminate { .. } => CANCEL_SIGNAL,
        }
    }

    /// Wire payload for this signal. Payload-free signals send an empty string.
    pub fn payload(&self) -> String {
        match self {
            ProjectSignal::PhotoAdded { reference, kind } => encode(&PhotoPayload {
                reference: reference.clone(),
                kind: *kind,
            }),
            ProjectSignal::ScanCompleted(data) => encode(data),
            ProjectSignal::IntakeCompleted(brief) => encode(brief),
            ProjectSignal::OptionSelected { index } => encode(&SelectionPayload { index: *index }),
            ProjectSignal::AnnotationEdit { annotations } => encode(&AnnotationPayload {
                annotations: annotations.clone(),
            }),
            ProjectSignal::TextFeedback { text } => encode(&FeedbackPayload { text: text.clone() }),
            ProjectSignal::Terminate { reason } => reason.clone(),
            _ => String::new(),
        }
    }

    pub fn parse(name: &str, data: &str) -> Result<Self, SignalError> {
        let signal = match name {
            PHOTO_ADDED => {
                let p: PhotoPayload = decode(PHOTO_ADDED, data)?;
                if p.reference.trim().is_empty() {
                    return Err(SignalError::MalformedPayload {
                        signal: PHOTO_ADDED,
                        reason: "empty photo reference".into(),
                    });
                }
                ProjectSignal::PhotoAdded {
                    reference: p.reference,
                    kind: p.kind,
                }
            }
            PHOTOS_CONFIRMED => ProjectSignal::PhotosConfirmed,
            SCAN_COMPLETED => ProjectSignal::ScanCompleted(decode(SCAN_COMPLETED, data)?),
            SCAN_SKIPPED => ProjectSignal::ScanSkipped,
            INTAKE_COMPLETED => ProjectSignal::IntakeCompleted(decode(INTAKE_COMPLETED, data)?),
            INTAKE_SKIPPED => ProjectSignal::IntakeSkipped,
            OPTION_SELECTED => {
                let p: SelectionPayload = decode(OPTION_SELECTED, data)?;
                ProjectSignal::OptionSelected { index: p.index }
            }
            START_OVER => ProjectSignal::StartOver,
            ANNOTATION_EDIT => {
                let p: AnnotationPayload = decode(ANNOTATION_EDIT, data)?;
                ProjectSignal::AnnotationEdit {
                    annotations: p.annotations,
                }
            }
            TEXT_FEEDBACK => {
                let p: FeedbackPayload = decode(TEXT_FEEDBACK, data)?;
                ProjectSignal::TextFeedback { text: p.text }
            }
            APPROVE => ProjectSignal::Approve,
            RETRY => ProjectSignal::Retry,
            CANCEL => ProjectSignal::Cancel,
            CANCEL_SIGNAL => ProjectSignal::Terminate {
                reason: data.to_string(),
            },
            other => return Err(SignalError::Unknown(other.to_string())),
        };
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_and_parse_agree() {
        let signals = vec![
            ProjectSignal::PhotoAdded { reference: "blob://r1".into(), kind: PhotoKind::Room },
            ProjectSignal::OptionSelected { index: -3 },
            ProjectSignal::TextFeedback { text: "warmer lighting".into() },
            ProjectSignal::Approve,
            ProjectSignal::Terminate { reason: "gdpr request".into() },
        ];
        for s in signals {
            assert_eq!(ProjectSignal::parse(s.name(), &s.payload()).unwrap(), s);
        }
    }

    #[test]
    fn photo_payload_wire_shape() {
        let s = ProjectSignal::parse(PHOTO_ADDED, r#"{"reference":"blob://x","kind":"inspiration"}"#).unwrap();
        assert_eq!(
            s,
            ProjectSignal::PhotoAdded { reference: "blob://x".into(), kind: PhotoKind::Inspiration }
        );
    }

    #[test]
    fn malformed_payloads_are_reported() {
        let err = ProjectSignal::parse(OPTION_SELECTED, r#"{"index":"first"}"#).unwrap_err();
        assert!(matches!(err, SignalError::MalformedPayload { signal: OPTION_SELECTED, .. }));
        assert!(ProjectSignal::parse(PHOTO_ADDED, r#"{"reference":" ","kind":"room"}"#).is_err());
        assert_eq!(
            ProjectSignal::parse("completeScan", "").unwrap_err(),
            SignalError::Unknown("completeScan".into())
        );
    }

    #[test]
    fn intake_brief_fields_are_optional() {
        let s = ProjectSignal::parse(INTAKE_COMPLETED, r#"{"styles":["scandi"]}"#).unwrap();
        let ProjectSignal::IntakeCompleted(brief) = s else { panic!("expected brief") };
        assert_eq!(brief.styles, vec!["scandi".to_string()]);
        assert!(brief.budget.is_none());
    }
}
