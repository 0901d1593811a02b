pub mod config;
pub mod encode;
pub mod sessions;

pub use config::{get_config, update_config};
pub use encode::{encode_frames, encode_upload};
pub use sessions::list_sessions;
