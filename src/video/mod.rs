//! # Video Pipeline
//!
//! Two export paths for rendered avatar frames:
//! - **encoder**: server-side batch encoding of a frame sequence (plus an
//!   optional audio track) into a single media file via an external ffmpeg
//!   process
//! - **recorder**: client-side live capture of the render surface into an
//!   incrementally assembled compressed stream

pub mod encoder;
pub mod recorder;

pub use encoder::{EncoderSettings, VideoEncoder};
pub use recorder::{CaptureSurface, ChunkEncoder, RecorderState, VideoRecorder};
