//! # Encode Endpoints
//!
//! HTTP surface over the batch video encoder, used by the recruiting
//! backend to export interview recordings.
//!
//! ## Endpoints:
//! - `POST /api/v1/encode`: encode a frame directory already on disk
//! - `POST /api/v1/encode/upload`: multipart frame upload, encoded from
//!   memory and streamed back as the finished media file

use crate::error::AppError;
use crate::state::AppState;
use crate::video::encoder::{EncoderSettings, VideoEncoder};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

/// JSON body of `POST /api/v1/encode`.
#[derive(Debug, Deserialize)]
pub struct EncodeJobRequest {
    /// Directory holding the numbered frame sequence
    pub frame_dir: PathBuf,
    /// Where the finished media file is written
    pub output_path: PathBuf,
    /// Frame rate of the input sequence; defaults to the streaming fps
    pub fps: Option<u32>,
    /// Optional audio track muxed in alongside the frames
    pub audio_path: Option<PathBuf>,
    /// Container format; picks the default codec pairing when codecs are
    /// not set explicitly
    pub format: Option<String>,
    pub video_codec: Option<String>,
    pub video_bitrate: Option<String>,
    pub audio_codec: Option<String>,
}

/// Merge job overrides over the configured encoder defaults.
fn settings_for_job(state: &AppState, req: &EncodeJobRequest) -> EncoderSettings {
    let config = state.get_config();
    let mut settings = EncoderSettings::from(&config.encoder);

    if let Some(format) = &req.format {
        let (video, audio) = VideoEncoder::codec_for_format(format);
        settings.format = format.clone();
        settings.video_codec = video.to_string();
        settings.audio_codec = audio.to_string();
    }
    if let Some(codec) = &req.video_codec {
        settings.video_codec = codec.clone();
    }
    if let Some(bitrate) = &req.video_bitrate {
        settings.video_bitrate = bitrate.clone();
    }
    if let Some(codec) = &req.audio_codec {
        settings.audio_codec = codec.clone();
    }
    settings
}

pub async fn encode_frames(
    state: web::Data<AppState>,
    body: web::Json<EncodeJobRequest>,
) -> Result<HttpResponse, AppError> {
    let req = body.into_inner();

    if !req.frame_dir.is_dir() {
        return Err(AppError::BadRequest(format!(
            "frame_dir '{}' is not a directory",
            req.frame_dir.display()
        )));
    }

    let fps = req.fps.unwrap_or_else(|| state.get_config().streaming.fps);
    let settings = settings_for_job(&state, &req);
    let encoder = VideoEncoder::new(settings);

    let result = encoder
        .encode_from_frames(
            &req.frame_dir,
            &req.output_path,
            fps,
            req.audio_path.as_deref(),
        )
        .await;

    state.record_encode_result(result.is_ok());
    result?;

    info!(output = %req.output_path.display(), "encode job finished");
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "output_path": req.output_path,
        "fps": fps,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Query parameters of the upload variant.
#[derive(Debug, Deserialize)]
pub struct EncodeUploadQuery {
    pub fps: Option<u32>,
    pub format: Option<String>,
}

pub async fn encode_upload(
    state: web::Data<AppState>,
    query: web::Query<EncodeUploadQuery>,
    mut payload: actix_multipart::Multipart,
) -> Result<HttpResponse, AppError> {
    use actix_multipart::Field;
    use futures_util::stream::StreamExt;

    // Frames arrive as repeated "frame" file fields, in playback order;
    // an optional "audio" field carries the speech track
    let mut frames: Vec<Vec<u8>> = Vec::new();
    let mut audio_data: Option<Vec<u8>> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::ValidationError("Missing content disposition".to_string()))?;

        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::ValidationError("Missing field name".to_string()))?
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
            bytes.extend_from_slice(&chunk);
        }

        match field_name.as_str() {
            "frame" => frames.push(bytes),
            "audio" => audio_data = Some(bytes),
            other => {
                warn!(field = %other, "ignoring unknown multipart field");
            }
        }
    }

    if frames.is_empty() {
        return Err(AppError::ValidationError(
            "No frame files provided".to_string(),
        ));
    }

    let config = state.get_config();
    let fps = query.fps.unwrap_or(config.streaming.fps);
    let format = query
        .format
        .clone()
        .unwrap_or_else(|| config.encoder.format.clone());

    let mut settings = EncoderSettings::from(&config.encoder);
    let (video_codec, audio_codec) = VideoEncoder::codec_for_format(&format);
    settings.format = format.clone();
    settings.video_codec = video_codec.to_string();
    settings.audio_codec = audio_codec.to_string();

    // Scratch paths for this one job; removed before the response leaves
    let job_id = uuid::Uuid::new_v4().simple().to_string();
    let output_path = std::env::temp_dir().join(format!("talentai-export-{}.{}", job_id, format));
    let audio_path = match &audio_data {
        Some(bytes) => {
            let path = std::env::temp_dir().join(format!("talentai-audio-{}", job_id));
            tokio::fs::write(&path, bytes).await?;
            Some(path)
        }
        None => None,
    };

    let encoder = VideoEncoder::new(settings);
    let result = encoder
        .encode_from_buffers(&frames, &output_path, fps, audio_path.as_deref())
        .await;

    if let Some(path) = &audio_path {
        let _ = tokio::fs::remove_file(path).await;
    }

    state.record_encode_result(result.is_ok());
    result?;

    let media = tokio::fs::read(&output_path).await?;
    let _ = tokio::fs::remove_file(&output_path).await;

    info!(
        frames = frames.len(),
        bytes = media.len(),
        format = %format,
        "upload encode finished"
    );

    Ok(HttpResponse::Ok()
        .content_type(content_type_for(&format))
        .body(media))
}

fn content_type_for(format: &str) -> &'static str {
    match format {
        "webm" => "video/webm",
        "ogg" | "ogv" => "video/ogg",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        _ => "video/mp4",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_settings_merge_order() {
        let state = AppState::new(AppConfig::default());

        // Format picks the pairing, explicit codec overrides it again
        let req = EncodeJobRequest {
            frame_dir: PathBuf::from("/tmp"),
            output_path: PathBuf::from("/tmp/out.webm"),
            fps: None,
            audio_path: None,
            format: Some("webm".to_string()),
            video_codec: Some("libvpx".to_string()),
            video_bitrate: None,
            audio_codec: None,
        };

        let settings = settings_for_job(&state, &req);
        assert_eq!(settings.format, "webm");
        assert_eq!(settings.video_codec, "libvpx");
        assert_eq!(settings.audio_codec, "libopus");
        // Untouched values come from the configured defaults
        assert_eq!(settings.video_bitrate, "2M");
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("webm"), "video/webm");
        assert_eq!(content_type_for("mp4"), "video/mp4");
        assert_eq!(content_type_for("anything"), "video/mp4");
    }
}
