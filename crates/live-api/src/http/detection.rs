use axum::Json;
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use shared::knowledge::{enrich_record, lookup, unidentified};
use shared::models::{
    DetectPestQuery, DetectPestResponse, ModelStatus, ModelStatusResponse, PestDetails,
    PestPrediction,
};
use shared::session::Language;
use thiserror::Error;
use tracing::{info, warn};

use super::AppState;
use super::errors::{
    bad_gateway_response, bad_request_response, payload_too_large_response,
    service_unavailable_response,
};

const ALLOWED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const BYTES_PER_MB: usize = 1024 * 1024;
const NO_PEST_IDENTIFIED: &str = "No pest could be identified in this image";

#[derive(Debug, Error, PartialEq, Eq)]
enum UploadError {
    #[error("No file uploaded")]
    Missing,
    #[error("Invalid file type. Allowed types: {}", ALLOWED_CONTENT_TYPES.join(", "))]
    InvalidType,
    #[error("File too large. Maximum size: {max_mb}MB")]
    TooLarge { max_mb: usize },
    #[error("Uploaded file is empty")]
    Empty,
    #[error("Failed to read upload: {0}")]
    Unreadable(String),
}

impl UploadError {
    fn into_error_response(self) -> Response {
        let message = self.to_string();
        match self {
            Self::Missing => bad_request_response("missing_file", &message),
            Self::InvalidType => bad_request_response("invalid_file_type", &message),
            Self::TooLarge { .. } => payload_too_large_response(&message),
            Self::Empty => bad_request_response("empty_file", &message),
            Self::Unreadable(_) => bad_request_response("invalid_upload", &message),
        }
    }
}

pub(super) async fn detect_pest(
    State(state): State<AppState>,
    Query(query): Query<DetectPestQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let image_bytes = match read_upload(multipart, state.max_upload_bytes).await {
        Ok(image_bytes) => image_bytes,
        Err(err) => {
            warn!(error = %err, "rejected pest image upload");
            return err.into_error_response();
        }
    };

    let Some(detector) = state.services.detector.as_ref() else {
        return service_unavailable_response(
            "detector_unavailable",
            "Pest detection model is not configured",
        );
    };

    let language = Language::from_client(query.language.as_deref());
    let record = enrich_record(detector.detect(&image_bytes).await, language);
    if record.is_configuration_error() {
        warn!(reason = %record.description, "pest detector is misconfigured");
        return service_unavailable_response("detector_unavailable", &record.description);
    }
    if record.is_error() {
        warn!(reason = %record.description, "pest detection failed");
        return bad_gateway_response("detection_failed", "Failed to process image");
    }

    let identified = record.is_identified();
    let knowledge = if identified {
        lookup(&record.pest_name, language)
    } else {
        unidentified(language)
    };
    let mut session = state
        .services
        .sessions
        .get_or_create(query.session_id.as_deref())
        .await;
    session.language = language;
    let confidence = f64::from(record.confidence);
    if identified {
        session.add_detected_pest(record);
    }
    state.services.sessions.save(&session).await;
    info!(
        session_id = %session.id(),
        pest_name = %knowledge.name,
        confidence,
        upload_bytes = image_bytes.len(),
        "pest image classified"
    );

    (
        StatusCode::OK,
        Json(DetectPestResponse {
            success: identified,
            prediction: PestPrediction {
                label: knowledge.name.clone(),
                confidence: (confidence * 10_000.0).round() / 10_000.0,
                is_harmful: knowledge.is_harmful,
            },
            message: if identified {
                format!("Successfully detected: {}", knowledge.name)
            } else {
                NO_PEST_IDENTIFIED.to_string()
            },
            details: PestDetails {
                description: knowledge.description,
                spread_method: knowledge.spread_method,
                precautions: knowledge.precautions,
            },
            session_id: session.id().to_string(),
        }),
    )
        .into_response()
}

pub(super) async fn model_status(State(state): State<AppState>) -> Response {
    let status = match state.services.detector.as_ref() {
        Some(detector) => {
            let health = detector.check_health().await;
            ModelStatus {
                configured: true,
                model_id: state.model_id.clone(),
                reachable: health.reachable,
                error: health.error,
            }
        }
        None => ModelStatus {
            configured: false,
            model_id: state.model_id.clone(),
            reachable: false,
            error: Some("DETECTOR_URL is not set".to_string()),
        },
    };

    (
        StatusCode::OK,
        Json(ModelStatusResponse {
            success: true,
            status,
        }),
    )
        .into_response()
}

async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
    max_upload_bytes: usize,
) -> Result<Vec<u8>, UploadError> {
    let mut multipart = multipart.map_err(|_| UploadError::Missing)?;

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|err| multipart_error(err, max_upload_bytes))?;
        let Some(field) = field else {
            return Err(UploadError::Missing);
        };
        if field.name() != Some("file") {
            continue;
        }

        if !is_allowed_image(&field) {
            return Err(UploadError::InvalidType);
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|err| multipart_error(err, max_upload_bytes))?;
        if bytes.len() > max_upload_bytes {
            return Err(too_large(max_upload_bytes));
        }
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        return Ok(bytes.to_vec());
    }
}

fn is_allowed_image(field: &Field<'_>) -> bool {
    let content_type_allowed = field
        .content_type()
        .map(|content_type| content_type.to_ascii_lowercase())
        .is_some_and(|content_type| ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()));
    if content_type_allowed {
        return true;
    }

    let generic_content_type = field
        .content_type()
        .is_none_or(|content_type| content_type == "application/octet-stream");
    generic_content_type
        && field
            .file_name()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, extension)| extension.to_ascii_lowercase())
            .is_some_and(|extension| ALLOWED_EXTENSIONS.contains(&extension.as_str()))
}

fn multipart_error(err: MultipartError, max_upload_bytes: usize) -> UploadError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(max_upload_bytes)
    } else {
        UploadError::Unreadable(err.body_text())
    }
}

fn too_large(max_upload_bytes: usize) -> UploadError {
    UploadError::TooLarge {
        max_mb: max_upload_bytes.div_ceil(BYTES_PER_MB),
    }
}
