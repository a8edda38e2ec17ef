use shared::{EnsembleResult, Verdict};
use std::fmt;

/// Which rule settled a video request's final label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arbitration {
    AudioAbsent,
    Agreement,
    VideoMoreConfident,
    AudioMoreConfident,
    TieFavoursVideo,
}

impl fmt::Display for Arbitration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Arbitration::AudioAbsent => "audio absent, video verdict stands",
            Arbitration::Agreement => "video and audio agree",
            Arbitration::VideoMoreConfident => "disagreement, video more confident",
            Arbitration::AudioMoreConfident => "disagreement, audio more confident",
            Arbitration::TieFavoursVideo => "disagreement at equal confidence, video preferred",
        };
        f.write_str(text)
    }
}

/// Picks one of the two verdicts' labels; confidences are never blended since
/// the backends are calibrated independently.
pub fn reconcile(video: Verdict, audio: Option<Verdict>) -> (EnsembleResult, Arbitration) {
    let (final_label, arbitration) = match &audio {
        None => (video.label(), Arbitration::AudioAbsent),
        Some(audio) if audio.label() == video.label() => (video.label(), Arbitration::Agreement),
        Some(audio) => {
            if video.confidence() > audio.confidence() {
                (video.label(), Arbitration::VideoMoreConfident)
            } else if audio.confidence() > video.confidence() {
                (audio.label(), Arbitration::AudioMoreConfident)
            } else {
                (video.label(), Arbitration::TieFavoursVideo)
            }
        }
    };

    (
        EnsembleResult {
            final_label,
            video,
            audio,
        },
        arbitration,
    )
}
