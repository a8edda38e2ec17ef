use actix_multipart::{Field, Multipart};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{HttpResponse, ResponseError, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use shared::{BackendsHealth, HealthStatus, MediaKind};
use std::collections::BTreeMap;

use crate::error::RouteError;
use crate::orchestrator::{RequestContext, RoutingOrchestrator, Upload};

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/route").route(web::post().to(route_upload)))
        .service(web::resource("/predict_all").route(web::post().to(route_upload)))
        .service(web::resource("/healthz").route(web::get().to(healthz)))
        .service(web::resource("/healthz/backends").route(web::get().to(backend_health)));
}

async fn route_upload(
    orchestrator: web::Data<RoutingOrchestrator>,
    payload: Multipart,
) -> HttpResponse {
    let mut ctx = RequestContext::new();
    let max_bytes = orchestrator.store().max_bytes();

    let result = match read_upload(payload, max_bytes).await {
        Ok(upload) => {
            info!(
                "[{}] Received upload {:?} ({} bytes)",
                ctx.id(),
                upload.filename,
                upload.bytes.len()
            );
            orchestrator.route(&mut ctx, upload).await
        }
        Err(e) => {
            ctx.fail(&e);
            Err(e)
        }
    };
    ctx.log_trail();

    let mut response = match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => {
            if matches!(e, RouteError::Internal(_)) {
                error!("{}", e.log_message(&ctx.id()));
            } else {
                warn!("{}", e.log_message(&ctx.id()));
            }
            e.error_response()
        }
    };
    if let Ok(value) = HeaderValue::from_str(&ctx.id().to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Takes the first multipart field that carries a filename; other fields are drained.
async fn read_upload(mut payload: Multipart, max_bytes: usize) -> Result<Upload, RouteError> {
    while let Some(field) = payload
        .try_next()
        .await
        .map_err(|e| RouteError::MalformedUpload(e.to_string()))?
    {
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(String::from);
        let Some(filename) = filename else {
            drain(field).await?;
            continue;
        };
        let content_type = field.content_type().map(|mime| mime.to_string());
        let bytes = collect_field(field, max_bytes).await?;
        return Ok(Upload {
            filename,
            content_type,
            bytes,
        });
    }
    Err(RouteError::MissingUpload)
}

async fn collect_field(mut field: Field, max_bytes: usize) -> Result<Vec<u8>, RouteError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| RouteError::MalformedUpload(e.to_string()))?;
        if data.len() + chunk.len() > max_bytes {
            return Err(RouteError::PayloadTooLarge { limit: max_bytes });
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn drain(mut field: Field) -> Result<(), RouteError> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|e| RouteError::MalformedUpload(e.to_string()))?;
    }
    Ok(())
}

async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(HealthStatus {
        status: "ok".to_string(),
    })
}

async fn backend_health(orchestrator: web::Data<RoutingOrchestrator>) -> HttpResponse {
    let dispatcher = orchestrator.dispatcher();
    let (image, audio, video) = futures::join!(
        dispatcher.probe(MediaKind::Image),
        dispatcher.probe(MediaKind::Audio),
        dispatcher.probe(MediaKind::Video),
    );

    let backends: BTreeMap<MediaKind, String> = [
        (MediaKind::Image, image),
        (MediaKind::Audio, audio),
        (MediaKind::Video, video),
    ]
    .into_iter()
    .map(|(kind, up)| (kind, if up { "ok" } else { "unavailable" }.to_string()))
    .collect();
    let status = if image && audio && video { "ok" } else { "degraded" };

    HttpResponse::Ok().json(BackendsHealth {
        status: status.to_string(),
        backends,
    })
}
