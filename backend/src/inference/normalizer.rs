//! Backend response contracts.
//!
//! Each backend gets one explicit contract naming the keys it may use and the
//! orientation of its labels, so schema drift shows up here rather than in
//! ad hoc key probing at call sites.

use serde_json::{Map, Value};
use shared::{Label, MediaKind, Verdict};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{modality} backend response does not match contract {contract}: {detail}")]
pub struct UnrecognizedSchema {
    pub modality: MediaKind,
    pub contract: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOrientation {
    /// The backend's label is the judgement itself.
    Direct,
    /// The backend's model reports the opposite class of its judgement.
    Inverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendContract {
    pub name: &'static str,
    pub modality: MediaKind,
    /// Accepted label keys, in precedence order.
    pub label_keys: &'static [&'static str],
    /// Accepted confidence keys, in precedence order.
    pub confidence_keys: &'static [&'static str],
    pub orientation: LabelOrientation,
}

pub const IMAGE_V1: BackendContract = BackendContract {
    name: "image/v1",
    modality: MediaKind::Image,
    label_keys: &["label", "prediction"],
    confidence_keys: &["confidence", "score"],
    orientation: LabelOrientation::Direct,
};

/// The audio classifier's id2label mapping is swapped: it says "real" for
/// synthetic speech and "fake" for authentic speech. Its top-1 score belongs
/// to its own top label, so the value carries over unchanged after the flip.
pub const AUDIO_V1: BackendContract = BackendContract {
    name: "audio/v1",
    modality: MediaKind::Audio,
    label_keys: &["label", "prediction"],
    confidence_keys: &["confidence", "score"],
    orientation: LabelOrientation::Inverted,
};

pub const VIDEO_V1: BackendContract = BackendContract {
    name: "video/v1",
    modality: MediaKind::Video,
    label_keys: &["label", "prediction"],
    confidence_keys: &["confidence", "score"],
    orientation: LabelOrientation::Direct,
};

pub fn contract_for(modality: MediaKind) -> &'static BackendContract {
    match modality {
        MediaKind::Image => &IMAGE_V1,
        MediaKind::Audio => &AUDIO_V1,
        MediaKind::Video => &VIDEO_V1,
    }
}

impl BackendContract {
    pub fn normalize(&self, raw: &Value) -> Result<Verdict, UnrecognizedSchema> {
        let object = raw
            .as_object()
            .ok_or_else(|| self.unrecognized("response is not a JSON object"))?;

        let (label_key, label_value) = self
            .first_present(object, self.label_keys)
            .ok_or_else(|| self.unrecognized(format!("none of {:?} present", self.label_keys)))?;
        let raw_label = label_value
            .as_str()
            .ok_or_else(|| self.unrecognized(format!("{} is not a string", label_key)))?;
        let label = parse_label(raw_label)
            .ok_or_else(|| self.unrecognized(format!("unknown label {:?}", raw_label)))?;
        let label = match self.orientation {
            LabelOrientation::Direct => label,
            LabelOrientation::Inverted => label.inverted(),
        };

        let (confidence_key, confidence_value) = self
            .first_present(object, self.confidence_keys)
            .ok_or_else(|| {
                self.unrecognized(format!("none of {:?} present", self.confidence_keys))
            })?;
        let confidence = confidence_value
            .as_f64()
            .ok_or_else(|| self.unrecognized(format!("{} is not a number", confidence_key)))?;

        let extra: Map<String, Value> = object
            .iter()
            .filter(|(key, _)| {
                !self.label_keys.contains(&key.as_str())
                    && !self.confidence_keys.contains(&key.as_str())
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Verdict::new(label, confidence, self.modality)
            .map(|verdict| verdict.with_extra(extra))
            .ok_or_else(|| {
                self.unrecognized(format!("{} {} is not within [0, 1]", confidence_key, confidence))
            })
    }

    fn first_present<'v>(
        &self,
        object: &'v Map<String, Value>,
        keys: &[&'static str],
    ) -> Option<(&'static str, &'v Value)> {
        keys.iter()
            .find_map(|key| object.get(*key).filter(|v| !v.is_null()).map(|v| (*key, v)))
    }

    fn unrecognized(&self, detail: impl Into<String>) -> UnrecognizedSchema {
        UnrecognizedSchema {
            modality: self.modality,
            contract: self.name,
            detail: detail.into(),
        }
    }
}

fn parse_label(raw: &str) -> Option<Label> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "real" | "realism" | "authentic" | "bonafide" => Some(Label::Real),
        "fake" | "deepfake" | "synthetic" | "spoof" => Some(Label::Fake),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn either_key_spelling_yields_the_same_verdict() {
        let spellings = [
            json!({"label": "FAKE", "confidence": 0.83}),
            json!({"prediction": "FAKE", "confidence": 0.83}),
            json!({"label": "FAKE", "score": 0.83}),
            json!({"prediction": "fake", "score": 0.83}),
        ];
        for modality in [MediaKind::Image, MediaKind::Video] {
            let contract = contract_for(modality);
            let expected = contract.normalize(&spellings[0]).unwrap();
            assert_eq!(expected.label(), Label::Fake);
            assert_eq!(expected.confidence(), 0.83);
            assert_eq!(expected.modality(), modality);
            for raw in &spellings[1..] {
                assert_eq!(contract.normalize(raw).unwrap(), expected, "{raw}");
            }
        }
    }

    #[test]
    fn audio_labels_are_inverted_and_confidence_kept() {
        let fake = AUDIO_V1
            .normalize(&json!({"label": "real", "score": 0.9}))
            .unwrap();
        assert_eq!(fake.label(), Label::Fake);
        assert_eq!(fake.confidence(), 0.9);

        let real = AUDIO_V1
            .normalize(&json!({"label": "fake", "score": 0.8}))
            .unwrap();
        assert_eq!(real.label(), Label::Real);
        assert_eq!(real.confidence(), 0.8);
    }

    #[test]
    fn extra_metadata_is_preserved() {
        let verdict = VIDEO_V1
            .normalize(&json!({"prediction": "REAL", "confidence": 0.71, "frames_evaluated": 12}))
            .unwrap();
        assert_eq!(verdict.extra().get("frames_evaluated"), Some(&json!(12)));
        assert!(!verdict.extra().contains_key("prediction"));

        let serialized = serde_json::to_value(&verdict).unwrap();
        assert_eq!(
            serialized,
            json!({
                "label": "REAL",
                "confidence": 0.71,
                "modality": "video",
                "frames_evaluated": 12
            })
        );
    }

    #[test]
    fn model_specific_label_names_are_understood() {
        let verdict = IMAGE_V1
            .normalize(&json!({"label": "Deepfake", "confidence": 0.6}))
            .unwrap();
        assert_eq!(verdict.label(), Label::Fake);
        let verdict = IMAGE_V1
            .normalize(&json!({"label": "Realism", "confidence": 0.6}))
            .unwrap();
        assert_eq!(verdict.label(), Label::Real);
    }

    #[test]
    fn missing_or_malformed_fields_are_unrecognized() {
        let cases = [
            json!({"verdict": "FAKE", "confidence": 0.5}),
            json!({"label": "FAKE", "probability": 0.5}),
            json!({"label": null, "confidence": 0.5}),
            json!({"label": 1, "confidence": 0.5}),
            json!({"label": "MAYBE", "confidence": 0.5}),
            json!({"label": "FAKE", "confidence": "high"}),
            json!({"label": "FAKE", "confidence": 1.5}),
            json!({"label": "FAKE", "confidence": -0.1}),
            json!("FAKE"),
        ];
        for raw in cases {
            let err = AUDIO_V1.normalize(&raw).unwrap_err();
            assert_eq!(err.modality, MediaKind::Audio);
            assert_eq!(err.contract, "audio/v1");
        }
    }
}
