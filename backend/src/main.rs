use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use media_router::config::AppConfig;
use media_router::detection::precondition::{GatePolicy, PreconditionValidator};
use media_router::detection::{DetectorSettings, RemoteFaceDetector};
use media_router::inference::dispatcher::BackendDispatcher;
use media_router::media::asset::AssetStore;
use media_router::media::audio::FfmpegAudioExtractor;
use media_router::media::classifier::MediaTypeClassifier;
use media_router::media::frames::FfmpegFrameGrabber;
use media_router::orchestrator::RoutingOrchestrator;
use media_router::routes::configure_routes;
use std::sync::Arc;

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", context, err);
    std::io::Error::other(format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load().map_err(|e| startup_error("Invalid configuration", e))?;

    let endpoints = config
        .backend_endpoints()
        .map_err(|e| startup_error("Invalid backend URL", e))?;
    log::info!(
        "Backends: image={} audio={} video={} (timeout {:?})",
        endpoints.image,
        endpoints.audio,
        endpoints.video,
        config.backend_timeout()
    );
    let dispatcher =
        BackendDispatcher::new(endpoints, config.backend_timeout(), config.video_sample_fps)
            .map_err(|e| startup_error("Failed to build backend client", e))?;

    let detector_client = reqwest::Client::builder()
        .timeout(config.backend_timeout())
        .build()
        .map_err(|e| startup_error("Failed to build detector client", e))?;
    let detector = RemoteFaceDetector::new(
        detector_client,
        DetectorSettings {
            endpoint: config
                .detector_url()
                .map_err(|e| startup_error("Invalid detector URL", e))?,
            checkpoint: config.detector.checkpoint.clone(),
            confidence_threshold: config.detector.confidence_threshold,
            nms_iou_threshold: config.detector.nms_iou_threshold,
        },
    );
    if let Some(checkpoint) = &config.detector.checkpoint {
        log::info!("Face detector checkpoint override: {}", checkpoint.display());
    }

    let gate = PreconditionValidator::new(
        Arc::new(detector),
        Arc::new(FfmpegFrameGrabber::new(
            config.ffmpeg_bin.clone(),
            config.backend_timeout(),
        )),
        GatePolicy {
            confidence_threshold: config.detector.confidence_threshold,
            nms_iou_threshold: config.detector.nms_iou_threshold,
            sample_frames: config.gate.sample_frames,
            sample_interval: config.gate_sample_interval(),
        },
    );
    log::info!(
        "Face gate samples {} frame(s) every {:?}; video backend samples at {} fps",
        config.gate.sample_frames,
        config.gate_sample_interval(),
        config.video_sample_fps
    );

    let store = AssetStore::new(&config.upload_dir, config.max_upload_bytes)
        .map_err(|e| startup_error("Upload directory unavailable", e))?;
    log::info!("Uploads staged in {}", store.root().display());

    let orchestrator = RoutingOrchestrator::new(
        MediaTypeClassifier::new(&config.audio_extensions),
        gate,
        dispatcher,
        Arc::new(FfmpegAudioExtractor::new(
            config.ffmpeg_bin.clone(),
            config.ffprobe_bin.clone(),
            config.backend_timeout(),
        )),
        store,
    );

    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .expose_headers(vec![actix_web::http::header::HeaderName::from_static(
                        "x-request-id",
                    )])
                    .max_age(3600),
            )
            .app_data(web::Data::new(orchestrator.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
