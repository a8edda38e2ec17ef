use chrono::{DateTime, Utc};
use shared::{MediaKind, RouteResponse, Verdict};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::detection::precondition::PreconditionValidator;
use crate::error::RouteError;
use crate::inference::dispatcher::{BackendDispatcher, Payload};
use crate::inference::ensemble::reconcile;
use crate::inference::normalizer::{AUDIO_V1, VIDEO_V1, contract_for};
use crate::media::asset::{AssetStore, UploadedAsset};
use crate::media::audio::{AudioExtractor, AudioTrack};
use crate::media::classifier::{MediaTypeClassifier, audio_mime_for_extension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Classified,
    Validated,
    Dispatching,
    Normalizing,
    Reconciling,
    Completed,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub stage: Stage,
    pub at: DateTime<Utc>,
    pub note: String,
}

/// Per-request correlation id and stage log. Lives only as long as the request.
#[derive(Debug)]
pub struct RequestContext {
    id: Uuid,
    stage: Stage,
    digest: Option<String>,
    staged: Vec<String>,
    steps: Vec<StepRecord>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        let mut ctx = Self {
            id: Uuid::new_v4(),
            stage: Stage::Received,
            digest: None,
            staged: Vec::new(),
            steps: Vec::new(),
        };
        ctx.record(Stage::Received, "request accepted".to_string());
        ctx
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Names of the files staged for this request: the upload, then any
    /// derived files such as extracted audio.
    pub fn staged_files(&self) -> &[String] {
        &self.staged
    }

    fn note_staged(&mut self, path: &Path) {
        if let Some(name) = path.file_name() {
            self.staged.push(name.to_string_lossy().into_owned());
        }
    }

    pub fn advance(&mut self, stage: Stage, note: impl Into<String>) {
        let note = note.into();
        log::info!("[{}] {}: {}", self.id, stage, note);
        self.record(stage, note);
    }

    pub fn fail(&mut self, err: &RouteError) {
        self.record(Stage::Failed, format!("{} ({})", err, err.reason()));
    }

    fn record(&mut self, stage: Stage, note: String) {
        self.stage = stage;
        self.steps.push(StepRecord {
            stage,
            at: Utc::now(),
            note,
        });
    }

    pub fn log_trail(&self) {
        for step in &self.steps {
            log::debug!(
                "[{}] {} {}: {}",
                self.id,
                step.at.to_rfc3339(),
                step.stage,
                step.note
            );
        }
        if !self.staged.is_empty() {
            log::debug!("[{}] staged files: {}", self.id, self.staged.join(", "));
        }
    }
}

/// An upload as received from the client.
#[derive(Debug)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Sequences classification, the face gate, backend dispatch, normalization
/// and, for video, audio extraction and reconciliation.
#[derive(Clone)]
pub struct RoutingOrchestrator {
    classifier: Arc<MediaTypeClassifier>,
    gate: PreconditionValidator,
    dispatcher: BackendDispatcher,
    audio: Arc<dyn AudioExtractor>,
    store: AssetStore,
}

impl RoutingOrchestrator {
    pub fn new(
        classifier: MediaTypeClassifier,
        gate: PreconditionValidator,
        dispatcher: BackendDispatcher,
        audio: Arc<dyn AudioExtractor>,
        store: AssetStore,
    ) -> Self {
        Self {
            classifier: Arc::new(classifier),
            gate,
            dispatcher,
            audio,
            store,
        }
    }

    pub fn dispatcher(&self) -> &BackendDispatcher {
        &self.dispatcher
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    pub async fn route(
        &self,
        ctx: &mut RequestContext,
        upload: Upload,
    ) -> Result<RouteResponse, RouteError> {
        let result = self.run(ctx, upload).await;
        match &result {
            Ok(response) => ctx.advance(
                Stage::Completed,
                format!("responded with {} prediction", response.file_type()),
            ),
            Err(err) => ctx.fail(err),
        }
        result
    }

    async fn run(
        &self,
        ctx: &mut RequestContext,
        upload: Upload,
    ) -> Result<RouteResponse, RouteError> {
        let kind = self
            .classifier
            .classify(upload.content_type.as_deref(), &upload.filename)?;
        ctx.advance(
            Stage::Classified,
            format!(
                "{} ({} bytes, content-type {:?})",
                kind,
                upload.bytes.len(),
                upload.content_type.as_deref().unwrap_or("")
            ),
        );

        let asset = self
            .store
            .persist(ctx.id(), &upload.filename, upload.content_type, upload.bytes)
            .await?;
        ctx.digest = Some(asset.digest().to_string());
        ctx.note_staged(asset.path());

        match kind {
            MediaKind::Image | MediaKind::Video => {
                let pass = self.gate.check(&asset, kind).await?;
                ctx.advance(
                    Stage::Validated,
                    format!("{} face(s) in {} frame(s)", pass.faces, pass.frames_checked),
                );
            }
            MediaKind::Audio => ctx.advance(Stage::Validated, "face gate not applicable"),
        }

        match kind {
            MediaKind::Image => Ok(RouteResponse::Image(self.single(ctx, kind, &asset).await?)),
            MediaKind::Audio => Ok(RouteResponse::Audio(self.single(ctx, kind, &asset).await?)),
            MediaKind::Video => self.video(ctx, &asset).await,
        }
    }

    async fn single(
        &self,
        ctx: &mut RequestContext,
        kind: MediaKind,
        asset: &UploadedAsset,
    ) -> Result<Verdict, RouteError> {
        ctx.advance(Stage::Dispatching, format!("{} backend", kind));
        let raw = self.dispatcher.dispatch(kind, payload_for(kind, asset)).await?;

        ctx.advance(Stage::Normalizing, contract_for(kind).name);
        Ok(contract_for(kind).normalize(&raw)?)
    }

    async fn video(
        &self,
        ctx: &mut RequestContext,
        asset: &UploadedAsset,
    ) -> Result<RouteResponse, RouteError> {
        ctx.advance(Stage::Dispatching, "video backend and audio extraction");

        let extracted = self.store.reserve(ctx.id(), "audio.wav");
        ctx.note_staged(extracted.path());
        let video_call = async {
            let raw = self
                .dispatcher
                .dispatch(MediaKind::Video, payload_for(MediaKind::Video, asset))
                .await?;
            Ok::<_, RouteError>(VIDEO_V1.normalize(&raw)?)
        };
        let audio_call = async {
            match self.audio.extract(asset.path(), extracted.path()).await {
                AudioTrack::Extracted => {}
                AudioTrack::NoAudioStream => return Err("no audio stream".to_string()),
                AudioTrack::Failed(reason) => {
                    return Err(format!("audio extraction failed: {}", reason));
                }
            }
            let bytes = tokio::fs::read(extracted.path())
                .await
                .map_err(|e| format!("extracted audio unreadable: {}", e))?;
            let payload = Payload {
                bytes,
                filename: "audio.wav".to_string(),
                content_type: "audio/wav".to_string(),
            };
            let raw = self
                .dispatcher
                .dispatch(MediaKind::Audio, payload)
                .await
                .map_err(|e| e.to_string())?;
            let verdict = AUDIO_V1.normalize(&raw).map_err(|e| e.to_string())?;
            Ok::<Verdict, String>(verdict)
        };

        let (video, audio) = futures::join!(video_call, audio_call);
        let video = video?;
        let audio = match audio {
            Ok(verdict) => Some(verdict),
            Err(reason) => {
                log::warn!("[{}] Continuing without audio evidence: {}", ctx.id(), reason);
                None
            }
        };
        ctx.advance(
            Stage::Normalizing,
            format!(
                "video {} @ {:.3}; audio {}",
                video.label(),
                video.confidence(),
                audio
                    .as_ref()
                    .map(|a| format!("{} @ {:.3}", a.label(), a.confidence()))
                    .unwrap_or_else(|| "absent".to_string())
            ),
        );

        let (result, arbitration) = reconcile(video, audio);
        ctx.advance(
            Stage::Reconciling,
            format!("final {}: {}", result.final_label, arbitration),
        );
        Ok(RouteResponse::Video(result))
    }
}

fn payload_for(kind: MediaKind, asset: &UploadedAsset) -> Payload {
    let declared = asset
        .content_type()
        .filter(|ct| ct.to_ascii_lowercase().starts_with(&format!("{}/", kind)));
    let content_type = match (declared, kind) {
        (Some(ct), _) => ct.to_string(),
        (None, MediaKind::Audio) => audio_mime_for_extension(asset.extension()).to_string(),
        (None, _) => "application/octet-stream".to_string(),
    };
    Payload {
        bytes: asset.bytes().to_vec(),
        filename: asset.filename().to_string(),
        content_type,
    }
}
