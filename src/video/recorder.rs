//! # Live Capture Recorder
//!
//! Captures a live render surface, one frame per render tick, into an
//! incrementally compressed stream that finalizes to a single downloadable
//! blob. Used for client-side export of an interview while it plays.
//!
//! The recorder enforces a wall-time budget but never self-terminates: once
//! the budget is exceeded `record_frame` keeps returning the stop signal and
//! the caller decides when to actually stop.

use crate::error::{AppError, AppResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Acceptable audio/video drift before a recording fails the sync gate.
const SYNC_THRESHOLD_MS: f64 = 50.0;

/// Magic prefix of the finalized chunk container.
const CONTAINER_MAGIC: &[u8; 4] = b"TAVR";

/// Source of raw frames, one per render tick. `None` means the surface has
/// become unavailable (context lost, window gone).
pub trait CaptureSurface: Send {
    fn capture_frame(&mut self) -> Option<Vec<u8>>;
}

/// Incremental compressor backing the recorder. Receives raw frames and
/// yields compressed chunks; `finalize` flushes whatever is still buffered.
pub trait ChunkEncoder: Send {
    fn encode_frame(&mut self, frame: &[u8]) -> Result<Vec<u8>, String>;
    fn finalize(&mut self) -> Result<Vec<u8>, String>;
}

/// Recorder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Stopped,
}

/// Assembles captured frames into a single output blob.
pub struct VideoRecorder {
    surface: Option<Box<dyn CaptureSurface>>,
    backend: Option<Box<dyn ChunkEncoder>>,
    state: RecorderState,
    chunks: Vec<Vec<u8>>,
    started_at: Option<Instant>,
    recorded_wall_time: Option<Duration>,
    max_duration: Duration,
    dropped_frames: u64,
}

impl VideoRecorder {
    pub fn new(
        surface: Option<Box<dyn CaptureSurface>>,
        backend: Option<Box<dyn ChunkEncoder>>,
        max_duration: Duration,
    ) -> Self {
        Self {
            surface,
            backend,
            state: RecorderState::Idle,
            chunks: Vec::new(),
            started_at: None,
            recorded_wall_time: None,
            max_duration,
            dropped_frames: 0,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Begin capturing.
    ///
    /// Fails when the capture surface or the encoder backend is unavailable,
    /// or when this recorder has already run; a recorder is single-use.
    pub fn start_recording(&mut self) -> AppResult<()> {
        if self.surface.is_none() {
            return Err(AppError::Internal(
                "cannot record: capture surface unavailable".to_string(),
            ));
        }
        if self.backend.is_none() {
            return Err(AppError::Internal(
                "cannot record: encoder backend unavailable".to_string(),
            ));
        }
        if self.state != RecorderState::Idle {
            return Err(AppError::BadRequest(format!(
                "recorder already used (state {:?})",
                self.state
            )));
        }

        self.state = RecorderState::Recording;
        self.started_at = Some(Instant::now());
        self.chunks.clear();
        info!(max_duration_secs = self.max_duration.as_secs_f64(), "recording started");
        Ok(())
    }

    /// Capture and encode one frame. Call once per render tick.
    ///
    /// ## Returns:
    /// - `true`: keep going (also returned for the idle no-op case)
    /// - `false`: the elapsed-time budget is exceeded; the caller should
    ///   stop the recording. Nothing is captured once the signal fires.
    pub fn record_frame(&mut self) -> bool {
        if self.state != RecorderState::Recording {
            return true;
        }

        let elapsed = self
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        if elapsed > self.max_duration {
            return false;
        }

        let Some(surface) = self.surface.as_mut() else {
            return true;
        };
        let Some(frame) = surface.capture_frame() else {
            self.dropped_frames += 1;
            warn!("capture surface yielded no frame");
            return true;
        };

        let Some(backend) = self.backend.as_mut() else {
            return true;
        };
        match backend.encode_frame(&frame) {
            Ok(chunk) if !chunk.is_empty() => self.chunks.push(chunk),
            Ok(_) => {}
            Err(e) => {
                self.dropped_frames += 1;
                warn!(error = %e, "frame encode failed");
            }
        }

        true
    }

    /// Finalize the captured stream into one output blob.
    ///
    /// Stopping a recorder that never started is not an error: it logs a
    /// warning and returns None so teardown paths can call this blindly.
    pub fn stop_recording(&mut self) -> Option<Vec<u8>> {
        if self.state != RecorderState::Recording {
            warn!(state = ?self.state, "stop_recording called while not recording");
            return None;
        }

        self.recorded_wall_time = self.started_at.map(|t| t.elapsed());
        self.state = RecorderState::Stopped;

        if let Some(backend) = self.backend.as_mut() {
            match backend.finalize() {
                Ok(trailer) if !trailer.is_empty() => self.chunks.push(trailer),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "backend finalize failed"),
            }
        }

        let blob = assemble_container(&self.chunks);
        info!(
            chunks = self.chunks.len(),
            bytes = blob.len(),
            "recording finalized"
        );
        Some(blob)
    }

    /// Elapsed recording wall time: frozen at stop time once stopped.
    pub fn elapsed(&self) -> Duration {
        match self.state {
            RecorderState::Idle => Duration::ZERO,
            RecorderState::Recording => self
                .started_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO),
            RecorderState::Stopped => self.recorded_wall_time.unwrap_or(Duration::ZERO),
        }
    }

    /// Compare recording wall time against a known audio duration.
    ///
    /// This is an acceptance gate for audio/video alignment, not a
    /// correction mechanism; the report says whether the drift stays under
    /// the fixed threshold.
    pub fn check_sync(&self, audio_duration_secs: f64) -> SyncReport {
        let recorded_secs = self.elapsed().as_secs_f64();
        let drift_ms = (recorded_secs - audio_duration_secs).abs() * 1000.0;
        SyncReport {
            recorded_secs,
            audio_secs: audio_duration_secs,
            drift_ms,
            in_sync: drift_ms <= SYNC_THRESHOLD_MS,
        }
    }
}

/// Result of the audio/video alignment gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncReport {
    pub recorded_secs: f64,
    pub audio_secs: f64,
    pub drift_ms: f64,
    pub in_sync: bool,
}

/// Concatenate compressed chunks into the output container: a magic tag,
/// a chunk count, then length-prefixed chunk bodies (all little-endian).
fn assemble_container(chunks: &[Vec<u8>]) -> Vec<u8> {
    let payload: usize = chunks.iter().map(|c| c.len() + 4).sum();
    let mut blob = Vec::with_capacity(CONTAINER_MAGIC.len() + 4 + payload);

    blob.extend_from_slice(CONTAINER_MAGIC);
    blob.write_u32::<LittleEndian>(chunks.len() as u32)
        .expect("writing to a Vec cannot fail");
    for chunk in chunks {
        blob.write_u32::<LittleEndian>(chunk.len() as u32)
            .expect("writing to a Vec cannot fail");
        blob.extend_from_slice(chunk);
    }
    blob
}

/// Split a finalized blob back into its chunks. Used by consumers that
/// re-mux the stream and by tests.
pub fn read_container(blob: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    let mut cursor = Cursor::new(blob);

    let mut magic = [0u8; 4];
    std::io::Read::read_exact(&mut cursor, &mut magic).map_err(|e| e.to_string())?;
    if &magic != CONTAINER_MAGIC {
        return Err("not a recorder container".to_string());
    }

    let count = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| e.to_string())?;
    let mut chunks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| e.to_string())? as usize;
        let mut chunk = vec![0u8; len];
        std::io::Read::read_exact(&mut cursor, &mut chunk).map_err(|e| e.to_string())?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockSurface {
        frames_served: u32,
        lost: bool,
    }

    impl MockSurface {
        fn new() -> Self {
            Self {
                frames_served: 0,
                lost: false,
            }
        }
    }

    impl CaptureSurface for MockSurface {
        fn capture_frame(&mut self) -> Option<Vec<u8>> {
            if self.lost {
                return None;
            }
            self.frames_served += 1;
            Some(vec![self.frames_served as u8; 8])
        }
    }

    /// Passthrough compressor with a one-byte trailer on finalize.
    struct MockEncoder;

    impl ChunkEncoder for MockEncoder {
        fn encode_frame(&mut self, frame: &[u8]) -> Result<Vec<u8>, String> {
            Ok(frame.to_vec())
        }

        fn finalize(&mut self) -> Result<Vec<u8>, String> {
            Ok(vec![0xFF])
        }
    }

    fn recorder(max: Duration) -> VideoRecorder {
        VideoRecorder::new(
            Some(Box::new(MockSurface::new())),
            Some(Box::new(MockEncoder)),
            max,
        )
    }

    #[test]
    fn test_start_requires_surface_and_backend() {
        let mut no_surface =
            VideoRecorder::new(None, Some(Box::new(MockEncoder)), Duration::from_secs(60));
        assert!(no_surface.start_recording().is_err());

        let mut no_backend = VideoRecorder::new(
            Some(Box::new(MockSurface::new())),
            None,
            Duration::from_secs(60),
        );
        assert!(no_backend.start_recording().is_err());

        let mut ok = recorder(Duration::from_secs(60));
        assert!(ok.start_recording().is_ok());
        assert_eq!(ok.state(), RecorderState::Recording);
    }

    #[test]
    fn test_record_frame_is_noop_when_idle() {
        let mut rec = recorder(Duration::from_secs(60));
        assert!(rec.record_frame());
        assert_eq!(rec.state(), RecorderState::Idle);
    }

    #[test]
    fn test_capture_and_finalize_round_trip() {
        let mut rec = recorder(Duration::from_secs(60));
        rec.start_recording().unwrap();

        for _ in 0..3 {
            assert!(rec.record_frame());
        }

        let blob = rec.stop_recording().unwrap();
        assert_eq!(rec.state(), RecorderState::Stopped);

        // Three frames plus the backend trailer
        let chunks = read_container(&blob).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], vec![1u8; 8]);
        assert_eq!(chunks[2], vec![3u8; 8]);
        assert_eq!(chunks[3], vec![0xFF]);
    }

    #[test]
    fn test_budget_exceeded_signals_stop() {
        let mut rec = recorder(Duration::from_millis(10));
        rec.start_recording().unwrap();

        std::thread::sleep(Duration::from_millis(25));

        // Signal fires but the recorder stays in Recording until told
        assert!(!rec.record_frame());
        assert!(!rec.record_frame());
        assert_eq!(rec.state(), RecorderState::Recording);

        assert!(rec.stop_recording().is_some());
    }

    #[test]
    fn test_stop_while_idle_returns_none() {
        let mut rec = recorder(Duration::from_secs(60));
        assert!(rec.stop_recording().is_none());
        assert_eq!(rec.state(), RecorderState::Idle);
    }

    #[test]
    fn test_lost_surface_drops_frames_without_failing() {
        let mut rec = VideoRecorder::new(
            Some(Box::new(MockSurface {
                frames_served: 0,
                lost: true,
            })),
            Some(Box::new(MockEncoder)),
            Duration::from_secs(60),
        );
        rec.start_recording().unwrap();

        assert!(rec.record_frame());
        assert_eq!(rec.dropped_frames(), 1);

        // Only the finalize trailer makes it into the blob
        let blob = rec.stop_recording().unwrap();
        assert_eq!(read_container(&blob).unwrap().len(), 1);
    }

    #[test]
    fn test_recorder_is_single_use() {
        let mut rec = recorder(Duration::from_secs(60));
        rec.start_recording().unwrap();
        rec.stop_recording().unwrap();
        assert!(rec.start_recording().is_err());
    }

    #[test]
    fn test_check_sync_gate() {
        let mut rec = recorder(Duration::from_secs(60));
        rec.start_recording().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        rec.stop_recording().unwrap();

        let recorded = rec.elapsed().as_secs_f64();

        // Matching audio duration: drift well under the gate
        let report = rec.check_sync(recorded);
        assert!(report.in_sync, "drift was {}ms", report.drift_ms);

        // A full second of drift fails the gate
        let report = rec.check_sync(recorded + 1.0);
        assert!(!report.in_sync);
        assert!(report.drift_ms > SYNC_THRESHOLD_MS);
    }

    #[test]
    fn test_container_rejects_foreign_blobs() {
        assert!(read_container(b"nope").is_err());
        assert!(read_container(b"JUNKJUNKJUNK").is_err());
    }
}
