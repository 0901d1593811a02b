//! # Avatar Animation
//!
//! Phoneme-driven lip-sync for the talking avatar: a pure phoneme-to-viseme
//! table, and adapters that apply timed phoneme tracks (plus optional
//! emotion vectors) to a model's morph-target influences every render tick.

pub mod adapter;
pub mod phoneme;

pub use adapter::{
    AnimationError, AvatarAdapter, MorphMesh, MorphTargetAdapter, PhonemeEvent, SceneNode,
    SkeletalAdapter,
};
pub use phoneme::{MorphWeightSet, PhonemeMapper, LIP_SYNC_TARGETS, REST_PHONEME};
