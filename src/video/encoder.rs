//! # Batch Video Encoding
//!
//! Turns a directory (or in-memory sequence) of numbered frame images into a
//! single compressed media file by invoking an external ffmpeg process.
//!
//! Argument construction is a pure function so the exact command line is
//! testable without ever spawning a process. The spawn-await-cleanup path
//! guarantees that temporary frame staging is reclaimed on every exit,
//! success or failure.

use crate::config::EncoderConfig;
use crate::error::{AppError, AppResult};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Zero-padded sequential frame naming expected by the encoder input.
pub const FRAME_FILE_PATTERN: &str = "frame_%06d.png";

/// Longest stderr tail carried into an error message. Encoder diagnostics
/// can run to megabytes; the useful part is at the end.
const DIAGNOSTIC_TAIL_CHARS: usize = 200;

/// Codec configuration for one encode job.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub ffmpeg_path: String,
    pub video_codec: String,
    pub video_bitrate: String,
    pub audio_codec: String,
    pub format: String,
}

impl From<&EncoderConfig> for EncoderSettings {
    fn from(cfg: &EncoderConfig) -> Self {
        Self {
            ffmpeg_path: cfg.ffmpeg_path.clone(),
            video_codec: cfg.video_codec.clone(),
            video_bitrate: cfg.video_bitrate.clone(),
            audio_codec: cfg.audio_codec.clone(),
            format: cfg.format.clone(),
        }
    }
}

/// Server-side batch encoder. One encode call is one external process
/// invocation, awaited to completion; there is no job queue and no
/// mid-flight cancellation.
pub struct VideoEncoder {
    settings: EncoderSettings,
}

impl VideoEncoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Default codec pairing (video, audio) for a container format.
    ///
    /// Unrecognized formats fall back to the H.264/AAC pairing, which every
    /// common container accepts. Never fails.
    pub fn codec_for_format(format: &str) -> (&'static str, &'static str) {
        match format {
            "webm" => ("libvpx-vp9", "libopus"),
            "ogg" | "ogv" => ("libtheora", "libvorbis"),
            "mp4" | "mov" | "mkv" => ("libx264", "aac"),
            _ => ("libx264", "aac"),
        }
    }

    /// Build the full ffmpeg argument list for one job. Pure.
    ///
    /// Codec-specific quirks are applied only when the selected codec
    /// matches: the VP8/VP9 encoders need alternate reference frames
    /// disabled for streaming-friendly output, and that flag must not leak
    /// into the argument list of any other codec.
    pub fn build_args(
        &self,
        frame_dir: &Path,
        output: &Path,
        fps: u32,
        audio: Option<&Path>,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".to_string(),
            "-framerate".to_string(),
            fps.to_string(),
            "-i".to_string(),
            frame_dir.join(FRAME_FILE_PATTERN).display().to_string(),
        ];

        if let Some(audio) = audio {
            args.push("-i".to_string());
            args.push(audio.display().to_string());
        }

        args.extend([
            "-c:v".to_string(),
            self.settings.video_codec.clone(),
            "-b:v".to_string(),
            self.settings.video_bitrate.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]);

        if self.settings.video_codec.starts_with("libvpx") {
            args.push("-auto-alt-ref".to_string());
            args.push("0".to_string());
        }

        if audio.is_some() {
            args.extend([
                "-c:a".to_string(),
                self.settings.audio_codec.clone(),
                // Bound the output to the shorter stream so audio and video
                // can never drift into a silently extended tail
                "-shortest".to_string(),
            ]);
        }

        args.push(output.display().to_string());
        args
    }

    /// Encode a numbered frame sequence on disk into `output`.
    ///
    /// ## Failure semantics:
    /// - Spawn failure (binary missing, permissions): rejected with the
    ///   underlying error
    /// - Nonzero exit: rejected with the exit code and the bounded tail of
    ///   the process diagnostics
    pub async fn encode_from_frames(
        &self,
        frame_dir: &Path,
        output: &Path,
        fps: u32,
        audio: Option<&Path>,
    ) -> AppResult<()> {
        let args = self.build_args(frame_dir, output, fps, audio);
        debug!(binary = %self.settings.ffmpeg_path, ?args, "spawning encoder");

        let result = Command::new(&self.settings.ffmpeg_path)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                AppError::Encode(format!(
                    "failed to spawn encoder '{}': {}",
                    self.settings.ffmpeg_path, e
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let code = result
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(AppError::Encode(format!(
                "encoder exited with status {}: {}",
                code,
                diagnostic_tail(&stderr, DIAGNOSTIC_TAIL_CHARS)
            )));
        }

        info!(output = %output.display(), fps, "encode completed");
        Ok(())
    }

    /// Encode an in-memory frame sequence.
    ///
    /// Frames are staged under a freshly created temporary directory with
    /// deterministic zero-padded filenames, encoded, and the directory is
    /// removed again no matter how the encode ends.
    pub async fn encode_from_buffers(
        &self,
        frames: &[Vec<u8>],
        output: &Path,
        fps: u32,
        audio: Option<&Path>,
    ) -> AppResult<()> {
        if frames.is_empty() {
            return Err(AppError::BadRequest("no frames to encode".to_string()));
        }

        let staging = std::env::temp_dir().join(format!(
            "talentai-encode-{}",
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::create_dir_all(&staging).await?;

        let result = self
            .stage_and_encode(&staging, frames, output, fps, audio)
            .await;

        // Reclaim the staging directory on success AND failure
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            warn!(dir = %staging.display(), error = %e, "staging cleanup failed");
        }

        result
    }

    async fn stage_and_encode(
        &self,
        staging: &Path,
        frames: &[Vec<u8>],
        output: &Path,
        fps: u32,
        audio: Option<&Path>,
    ) -> AppResult<()> {
        for (index, frame) in frames.iter().enumerate() {
            let path = staging.join(frame_file_name(index));
            tokio::fs::write(&path, frame).await?;
        }

        self.encode_from_frames(staging, output, fps, audio).await
    }
}

/// Staged filename for the frame at `index`, matching `FRAME_FILE_PATTERN`.
pub fn frame_file_name(index: usize) -> String {
    format!("frame_{:06}.png", index)
}

/// Last `max_chars` characters of a diagnostic dump.
fn diagnostic_tail(output: &str, max_chars: usize) -> &str {
    let trimmed = output.trim_end();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed;
    }

    let skip = count - max_chars;
    match trimmed.char_indices().nth(skip) {
        Some((byte_idx, _)) => &trimmed[byte_idx..],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(video_codec: &str) -> EncoderSettings {
        EncoderSettings {
            ffmpeg_path: "ffmpeg".to_string(),
            video_codec: video_codec.to_string(),
            video_bitrate: "2M".to_string(),
            audio_codec: "aac".to_string(),
            format: "mp4".to_string(),
        }
    }

    #[test]
    fn test_args_without_audio() {
        let encoder = VideoEncoder::new(settings("libx264"));
        let args = encoder.build_args(
            Path::new("/tmp/frames"),
            Path::new("/tmp/out.mp4"),
            30,
            None,
        );

        assert_eq!(
            args,
            vec![
                "-y",
                "-framerate",
                "30",
                "-i",
                "/tmp/frames/frame_%06d.png",
                "-c:v",
                "libx264",
                "-b:v",
                "2M",
                "-pix_fmt",
                "yuv420p",
                "/tmp/out.mp4",
            ]
        );
    }

    #[test]
    fn test_args_with_audio_bound_to_shortest() {
        let encoder = VideoEncoder::new(settings("libx264"));
        let args = encoder.build_args(
            Path::new("/tmp/frames"),
            Path::new("/tmp/out.mp4"),
            24,
            Some(Path::new("/tmp/speech.wav")),
        );

        let audio_input = args.iter().position(|a| a == "/tmp/speech.wav").unwrap();
        assert_eq!(args[audio_input - 1], "-i");
        assert!(args.contains(&"-c:a".to_string()));
        assert!(args.contains(&"-shortest".to_string()));
    }

    #[test]
    fn test_vpx_quirk_only_applies_to_vpx() {
        let vpx = VideoEncoder::new(settings("libvpx-vp9"));
        let args = vpx.build_args(Path::new("/f"), Path::new("/o.webm"), 30, None);
        let pos = args.iter().position(|a| a == "-auto-alt-ref").unwrap();
        assert_eq!(args[pos + 1], "0");

        let h264 = VideoEncoder::new(settings("libx264"));
        let args = h264.build_args(Path::new("/f"), Path::new("/o.mp4"), 30, None);
        assert!(!args.contains(&"-auto-alt-ref".to_string()));
    }

    #[test]
    fn test_codec_for_format() {
        assert_eq!(VideoEncoder::codec_for_format("webm"), ("libvpx-vp9", "libopus"));
        assert_eq!(VideoEncoder::codec_for_format("ogv"), ("libtheora", "libvorbis"));
        assert_eq!(VideoEncoder::codec_for_format("mp4"), ("libx264", "aac"));
        // Unrecognized containers fall back to a known-good pairing
        assert_eq!(VideoEncoder::codec_for_format("tape"), ("libx264", "aac"));
    }

    #[test]
    fn test_frame_file_names_are_zero_padded() {
        assert_eq!(frame_file_name(0), "frame_000000.png");
        assert_eq!(frame_file_name(41), "frame_000041.png");
        assert_eq!(frame_file_name(123456), "frame_123456.png");
    }

    #[test]
    fn test_diagnostic_tail_bounds_output() {
        assert_eq!(diagnostic_tail("short", 200), "short");

        let long = "x".repeat(500);
        assert_eq!(diagnostic_tail(&long, 200).chars().count(), 200);

        // Multi-byte characters must not split
        let unicode = "é".repeat(300);
        let tail = diagnostic_tail(&unicode, 200);
        assert_eq!(tail.chars().count(), 200);
        assert!(tail.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn test_missing_binary_rejects_with_spawn_error() {
        let mut settings = settings("libx264");
        settings.ffmpeg_path = "/nonexistent/talentai-test-ffmpeg".to_string();
        let encoder = VideoEncoder::new(settings);

        let frame_dir = std::env::temp_dir().join(format!(
            "talentai-spawn-test-{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&frame_dir).unwrap();
        std::fs::write(frame_dir.join(frame_file_name(0)), b"not-a-real-png").unwrap();

        let output = frame_dir.join("out.mp4");
        let err = encoder
            .encode_from_frames(&frame_dir, &output, 30, None)
            .await
            .unwrap_err();

        match err {
            AppError::Encode(msg) => assert!(msg.contains("failed to spawn"), "got: {}", msg),
            other => panic!("expected Encode error, got {:?}", other),
        }
        // No partial output file is left behind
        assert!(!output.exists());

        std::fs::remove_dir_all(&frame_dir).unwrap();
    }

    #[tokio::test]
    async fn test_buffer_staging_is_reclaimed_on_failure() {
        let mut settings = settings("libx264");
        settings.ffmpeg_path = "/nonexistent/talentai-test-ffmpeg".to_string();
        let encoder = VideoEncoder::new(settings);

        let staged_dirs = || -> usize {
            std::fs::read_dir(std::env::temp_dir())
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.file_name()
                        .to_string_lossy()
                        .starts_with("talentai-encode-")
                })
                .count()
        };

        let before = staged_dirs();
        let output = std::env::temp_dir().join("talentai-buffers-out.mp4");
        let err = encoder
            .encode_from_buffers(&[vec![1, 2, 3]], &output, 30, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Encode(_)));

        // The staging directory is gone even though the encode failed
        assert_eq!(staged_dirs(), before);
    }

    #[tokio::test]
    async fn test_empty_buffer_sequence_is_rejected() {
        let encoder = VideoEncoder::new(settings("libx264"));
        let err = encoder
            .encode_from_buffers(&[], Path::new("/tmp/out.mp4"), 30, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
