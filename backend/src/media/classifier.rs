use shared::MediaKind;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unsupported media type: content-type {content_type:?}, extension {extension:?}")]
pub struct UnsupportedMediaType {
    pub content_type: String,
    pub extension: String,
}

/// Infers a [`MediaKind`] from the declared content type, falling back to the
/// filename extension for audio uploads sent with a generic or missing type.
#[derive(Debug, Clone)]
pub struct MediaTypeClassifier {
    audio_extensions: HashSet<String>,
}

impl MediaTypeClassifier {
    pub fn new<I, S>(audio_extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let audio_extensions = audio_extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .filter(|ext| ext.len() > 1)
            .collect();
        Self { audio_extensions }
    }

    pub fn classify(
        &self,
        content_type: Option<&str>,
        filename: &str,
    ) -> Result<MediaKind, UnsupportedMediaType> {
        let content_type = content_type.map(essence).unwrap_or_default();
        let extension = extension_of(filename);

        if content_type.starts_with("image/") {
            return Ok(MediaKind::Image);
        }
        if content_type.starts_with("video/") {
            return Ok(MediaKind::Video);
        }
        if content_type.starts_with("audio/") || self.audio_extensions.contains(&extension) {
            return Ok(MediaKind::Audio);
        }

        Err(UnsupportedMediaType {
            content_type,
            extension,
        })
    }
}

/// Lowercased extension with its leading dot, or an empty string.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Content type to declare when forwarding an audio file whose upload type was generic.
pub fn audio_mime_for_extension(extension: &str) -> &'static str {
    match extension {
        ".mp3" => "audio/mpeg",
        ".flac" => "audio/flac",
        ".ogg" => "audio/ogg",
        ".m4a" => "audio/mp4",
        _ => "audio/wav",
    }
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
