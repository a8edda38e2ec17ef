//! Test doubles: real HTTP backends bound to loopback, and in-process fakes
//! for the face detector, frame grabber and audio extractor.

use actix_web::dev::ServerHandle;
use actix_web::http::StatusCode;
use actix_web::{App, HttpResponse, HttpServer, web};
use futures::future::BoxFuture;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::Value;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::detection::precondition::{GatePolicy, PreconditionValidator};
use crate::detection::{DetectorError, FaceDetector, FaceRegion};
use crate::inference::dispatcher::{BackendDispatcher, BackendEndpoints};
use crate::media::asset::AssetStore;
use crate::media::audio::{AudioExtractor, AudioTrack};
use crate::media::classifier::MediaTypeClassifier;
use crate::media::frames::{FrameError, FrameGrabber};
use crate::orchestrator::RoutingOrchestrator;

pub fn png_bytes() -> Vec<u8> {
    let frame = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, image::Rgb([200, 160, 140])));
    let mut buf = Vec::new();
    frame
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// An executable in `dir` that ignores its arguments and hangs, standing in
/// for a stuck ffmpeg or ffprobe.
#[cfg(unix)]
pub fn stalled_tool(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("stalled-tool");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[derive(Debug, Clone)]
pub struct MockReply {
    status: u16,
    body: String,
    delay: Option<Duration>,
}

impl MockReply {
    pub fn json(value: Value) -> Self {
        Self::raw(200, &value.to_string())
    }

    pub fn status(status: u16) -> Self {
        Self::raw(status, r#"{"detail":"backend error"}"#)
    }

    pub fn raw(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type RequestLog = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

/// A stand-in for all three inference backends on one loopback port.
pub struct MockBackend {
    base_url: Url,
    requests: RequestLog,
    _handle: ServerHandle,
}

impl MockBackend {
    pub async fn start(routes: Vec<(&'static str, MockReply)>) -> Self {
        let requests: RequestLog = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);
        let server_log = requests.clone();

        let server = HttpServer::new(move || {
            let mut app = App::new().app_data(web::PayloadConfig::new(4 * 1024 * 1024));
            for (path, reply) in routes.iter() {
                let path = path.to_string();
                let reply = reply.clone();
                let log = server_log.clone();
                app = app.route(
                    &path.clone(),
                    web::to(move |body: web::Bytes| {
                        let path = path.clone();
                        let reply = reply.clone();
                        let log = log.clone();
                        async move {
                            log.lock().unwrap().push((path, body.to_vec()));
                            if let Some(delay) = reply.delay {
                                actix_web::rt::time::sleep(delay).await;
                            }
                            HttpResponse::build(StatusCode::from_u16(reply.status).unwrap())
                                .content_type("application/json")
                                .body(reply.body)
                        }
                    }),
                );
            }
            app
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        Self {
            base_url: Url::parse(&format!("http://{}", addr)).unwrap(),
            requests,
            _handle: handle,
        }
    }

    pub fn endpoints(&self) -> BackendEndpoints {
        BackendEndpoints {
            image: self.base_url.clone(),
            audio: self.base_url.clone(),
            video: self.base_url.clone(),
        }
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    pub fn last_body(&self, path: &str) -> Option<Vec<u8>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, body)| body.clone())
    }
}

enum Detection {
    Counts(Vec<usize>),
    Regions(Vec<FaceRegion>),
    Fail,
}

pub struct FakeDetector {
    detection: Detection,
    calls: AtomicUsize,
}

impl FakeDetector {
    /// `n` well-separated confident faces on every frame.
    pub fn faces(n: usize) -> Self {
        Self::sequence(vec![n])
    }

    /// Face counts per successive call; the last entry repeats.
    pub fn sequence(counts: Vec<usize>) -> Self {
        Self {
            detection: Detection::Counts(counts),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn regions(regions: Vec<FaceRegion>) -> Self {
        Self {
            detection: Detection::Regions(regions),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            detection: Detection::Fail,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceDetector for FakeDetector {
    fn detect(
        &self,
        _frame: Arc<DynamicImage>,
    ) -> BoxFuture<'_, Result<Vec<FaceRegion>, DetectorError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let result = match &self.detection {
            Detection::Counts(counts) => {
                let n = counts.get(call).or(counts.last()).copied().unwrap_or(0);
                Ok((0..n)
                    .map(|i| FaceRegion {
                        x1: i as f32 * 20.0,
                        y1: 0.0,
                        x2: i as f32 * 20.0 + 10.0,
                        y2: 10.0,
                        score: 0.9,
                    })
                    .collect())
            }
            Detection::Regions(regions) => Ok(regions.clone()),
            Detection::Fail => Err(DetectorError::Status(503)),
        };
        Box::pin(async move { result })
    }
}

pub struct FakeFrames {
    decodable: bool,
    requested: Mutex<Vec<Duration>>,
}

impl FakeFrames {
    pub fn always() -> Self {
        Self {
            decodable: true,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn none() -> Self {
        Self {
            decodable: false,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<Duration> {
        self.requested.lock().unwrap().clone()
    }
}

impl FrameGrabber for FakeFrames {
    fn grab<'a>(
        &'a self,
        _video: &'a Path,
        at: Duration,
    ) -> BoxFuture<'a, Result<Vec<u8>, FrameError>> {
        self.requested.lock().unwrap().push(at);
        let result = if self.decodable {
            Ok(png_bytes())
        } else {
            Err(FrameError::Missing {
                at,
                reason: "no frame decoded".into(),
            })
        };
        Box::pin(async move { result })
    }
}

pub struct FakeAudio {
    present: bool,
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl FakeAudio {
    pub fn extracted() -> Self {
        Self {
            present: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn absent() -> Self {
        Self {
            present: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(source, target)` of every extraction requested so far.
    pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

impl AudioExtractor for FakeAudio {
    fn extract<'a>(&'a self, source: &'a Path, target: &'a Path) -> BoxFuture<'a, AudioTrack> {
        self.calls
            .lock()
            .unwrap()
            .push((source.to_path_buf(), target.to_path_buf()));
        let track = if !self.present {
            AudioTrack::NoAudioStream
        } else {
            match std::fs::write(target, b"RIFF\0\0\0\0WAVEfmt ") {
                Ok(()) => AudioTrack::Extracted,
                Err(e) => AudioTrack::Failed(e.to_string()),
            }
        };
        Box::pin(async move { track })
    }
}

/// An orchestrator wired to a [`MockBackend`] with a scratch upload directory.
pub struct TestRig {
    pub orchestrator: RoutingOrchestrator,
    pub detector: Arc<FakeDetector>,
    pub audio: Arc<FakeAudio>,
    dir: tempfile::TempDir,
}

impl TestRig {
    pub fn new(mock: &MockBackend, detector: FakeDetector, audio: FakeAudio) -> Self {
        Self::with_limit(mock, detector, audio, 1024 * 1024)
    }

    pub fn with_limit(
        mock: &MockBackend,
        detector: FakeDetector,
        audio: FakeAudio,
        max_upload_bytes: usize,
    ) -> Self {
        Self::build(mock, detector, audio, max_upload_bytes, Duration::from_secs(5))
    }

    pub fn with_timeout(
        mock: &MockBackend,
        detector: FakeDetector,
        audio: FakeAudio,
        backend_timeout: Duration,
    ) -> Self {
        Self::build(mock, detector, audio, 1024 * 1024, backend_timeout)
    }

    fn build(
        mock: &MockBackend,
        detector: FakeDetector,
        audio: FakeAudio,
        max_upload_bytes: usize,
        backend_timeout: Duration,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let detector = Arc::new(detector);
        let audio = Arc::new(audio);
        let gate = PreconditionValidator::new(
            detector.clone(),
            Arc::new(FakeFrames::always()),
            GatePolicy {
                confidence_threshold: 0.5,
                nms_iou_threshold: 0.3,
                sample_frames: 1,
                sample_interval: Duration::from_secs(1),
            },
        );
        let dispatcher = BackendDispatcher::new(mock.endpoints(), backend_timeout, 1).unwrap();
        let orchestrator = RoutingOrchestrator::new(
            MediaTypeClassifier::new([".wav", ".mp3", ".flac"]),
            gate,
            dispatcher,
            audio.clone(),
            AssetStore::new(dir.path(), max_upload_bytes).unwrap(),
        );

        Self {
            orchestrator,
            detector,
            audio,
            dir,
        }
    }

    pub fn stored_files(&self) -> usize {
        std::fs::read_dir(self.dir.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
