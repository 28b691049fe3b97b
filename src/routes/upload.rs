//! Video upload endpoints

use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::auth::{is_valid_profile, AuthError, DEFAULT_PROFILE};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::storage::{JobWorkspace, StoredFile};
use crate::upload::{UploadJob, VideoMetadata, DEFAULT_PRIVACY_STATUS};

const NO_VIDEO: &str = "No video provided";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_default))
        .route("/upload/:profile", post(upload_for_profile))
}

#[derive(Debug, Serialize)]
pub struct UploadAccepted {
    pub status: &'static str,
}

/// Upload a video using the default credential profile
pub async fn upload_default(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse> {
    handle_upload(&state, DEFAULT_PROFILE, multipart).await
}

/// Upload a video using a named credential profile
pub async fn upload_for_profile(
    State(state): State<AppState>,
    Path(profile): Path<String>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse> {
    handle_upload(&state, &profile, multipart).await
}

async fn handle_upload(
    state: &AppState,
    profile: &str,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse> {
    if !is_valid_profile(profile) {
        return Err(AuthError::InvalidProfile(profile.to_string()).into());
    }

    let multipart = multipart.map_err(|e| {
        tracing::debug!("Rejected multipart body: {}", e);
        AppError::Validation(NO_VIDEO.to_string())
    })?;

    // Workspace must outlive the publish call; dropping it removes the file
    let form = read_form(state, multipart).await?;
    let (Some(workspace), Some(video)) = (form.workspace, form.video) else {
        return Err(AppError::Validation(NO_VIDEO.to_string()));
    };

    let job = UploadJob {
        file_path: video.stored.path.clone(),
        content_type: video.content_type,
        profile: profile.to_string(),
        metadata: form.metadata,
    };

    tracing::info!(
        profile,
        file = %video.file_name,
        size = video.stored.size,
        "Received video upload"
    );

    let published = state.publisher().publish(&job).await;
    workspace.cleanup().await;
    let video_id = published?;

    tracing::info!(profile, video_id = %video_id, "Video was successfully uploaded");

    Ok((
        [("x-video-id", video_id)],
        Json(UploadAccepted {
            status: "Video upload and processing started",
        }),
    ))
}

// ============================================================================
// Form parsing
// ============================================================================

struct UploadedVideo {
    file_name: String,
    content_type: String,
    stored: StoredFile,
}

#[derive(Default)]
struct UploadForm {
    workspace: Option<JobWorkspace>,
    video: Option<UploadedVideo>,
    metadata: VideoMetadata,
}

async fn read_form(state: &AppState, mut multipart: Multipart) -> Result<UploadForm> {
    let mut form = UploadForm::default();
    let mut privacy_status = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "video" => {
                let file_name = match field.file_name() {
                    Some(file_name) if !file_name.is_empty() => file_name.to_string(),
                    _ => continue,
                };
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();

                let workspace = match form.workspace.take() {
                    Some(workspace) => workspace,
                    None => JobWorkspace::create(&state.config().storage.work_dir).await?,
                };
                let stored = workspace.save_stream(&file_name, field).await?;

                form.workspace = Some(workspace);
                form.video = Some(UploadedVideo {
                    file_name,
                    content_type,
                    stored,
                });
            }
            "title" => form.metadata.title = non_empty(field.text().await.map_err(multipart_error)?),
            "description" => {
                form.metadata.description = non_empty(field.text().await.map_err(multipart_error)?)
            }
            "category" => form.metadata.category = non_empty(field.text().await.map_err(multipart_error)?),
            "keywords" | "keywords[]" => {
                let value = field.text().await.map_err(multipart_error)?;
                form.metadata.tags.extend(split_keywords(&value));
            }
            "privacyStatus" => privacy_status = non_empty(field.text().await.map_err(multipart_error)?),
            "publishAt" => form.metadata.publish_at = non_empty(field.text().await.map_err(multipart_error)?),
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }

    form.metadata.privacy_status =
        privacy_status.unwrap_or_else(|| DEFAULT_PRIVACY_STATUS.to_string());

    Ok(form)
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::Validation(format!("Invalid multipart body: {}", err))
}

/// Blank values count as absent; anything else is kept verbatim
fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn split_keywords(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .map(str::to_string)
}
