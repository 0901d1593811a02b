//! # Avatar Animation Adapters
//!
//! Applies timed phoneme tracks (and optional emotion vectors) to a model's
//! morph-target influences. The model is consumed as a capability: a scene
//! graph is traversed looking for the first mesh exposing a morph-target
//! dictionary, and everything downstream works against that discovery.
//!
//! A model without a usable face mesh is a legitimate configuration (the
//! avatar can run headless for validation), so discovery failure downgrades
//! every animation call to a logged no-op instead of an error.

use crate::animation::phoneme::{
    MorphWeightSet, PhonemeMapper, LIP_SYNC_TARGETS, REST_PHONEME,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Assumed render-loop cadence used to advance viseme transitions.
const TICK_RATE: f64 = 60.0;

/// Shortest allowed cross-fade; keeps the per-tick increment finite.
const MIN_TRANSITION_SECS: f64 = 1.0 / TICK_RATE;

/// How strongly the emotion vector bleeds into the expression channels.
/// Emotion stays subordinate to lip-sync and never touches its channels.
const EMOTION_INFLUENCE: f32 = 0.6;

/// Expression morph targets the emotion vector maps onto, in vector order.
pub const EXPRESSION_TARGETS: [&str; 5] = ["joy", "angry", "sorrow", "fun", "surprised"];

/// One timed speech-sound record driving lip-sync.
///
/// Times are seconds relative to track start, with `start <= end`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhonemeEvent {
    pub phoneme: String,
    pub start: f64,
    pub end: f64,
}

impl PhonemeEvent {
    pub fn new(phoneme: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            phoneme: phoneme.into(),
            start,
            end,
        }
    }
}

/// A mesh exposing named morph targets over a parallel influence array.
#[derive(Debug, Clone)]
pub struct MorphMesh {
    pub name: String,
    /// Morph target name to index into `influences`
    pub morph_targets: HashMap<String, usize>,
    /// Mutable influence weights, one per morph target index
    pub influences: Vec<f32>,
}

/// Minimal traversable scene graph handed over by the model loader.
#[derive(Debug, Clone, Default)]
pub struct SceneNode {
    pub name: String,
    pub mesh: Option<MorphMesh>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mesh: None,
            children: Vec::new(),
        }
    }
}

/// Failure modes an adapter can report to its caller.
#[derive(Debug, PartialEq, Eq)]
pub enum AnimationError {
    /// The adapter variant cannot support this capability. Reported loudly
    /// so a missing feature stays visible during development instead of
    /// silently doing nothing.
    Unsupported(&'static str),
}

impl std::fmt::Display for AnimationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnimationError::Unsupported(what) => write!(f, "not implemented: {}", what),
        }
    }
}

impl std::error::Error for AnimationError {}

/// Capability set shared by all avatar animation backends.
pub trait AvatarAdapter {
    /// Drive lip-sync from a phoneme track at the given playhead time.
    fn animate(&mut self, track: &[PhonemeEvent], playhead: f64);

    /// Lip-sync plus an additive emotion blend on the expression channels.
    fn animate_with_emotion(
        &mut self,
        track: &[PhonemeEvent],
        playhead: f64,
        emotion: &[f32],
    ) -> Result<(), AnimationError>;

    /// Zero all influences and clear transition state.
    fn reset(&mut self);

    /// Expose the raw mouth shape a phoneme maps to.
    fn morph_target_for_phoneme(&self, phoneme: &str) -> MorphWeightSet;
}

/// Morph-target backed adapter for face meshes with blend shapes.
pub struct MorphTargetAdapter {
    root: SceneNode,
    /// Child-index path from the root to the discovered face mesh
    mesh_path: Option<Vec<usize>>,
    /// Influence indices of the lip-sync targets, in table order
    lip_indices: [Option<usize>; 5],
    /// Influence indices of the expression targets actually present
    expression_indices: Vec<usize>,
    current_phoneme: Option<String>,
    transition_progress: f32,
    transition_duration: f64,
}

impl MorphTargetAdapter {
    /// Take ownership of the scene and discover its face mesh.
    ///
    /// Discovery walks the graph depth-first and picks the first mesh with a
    /// nonempty morph-target dictionary. When nothing qualifies the adapter
    /// logs once and runs headless.
    pub fn new(root: SceneNode, transition_duration: f64) -> Self {
        let mut path = Vec::new();
        let mesh_path = if find_morph_mesh(&root, &mut path) {
            Some(path)
        } else {
            warn!("no morph-target mesh found in model; animation runs headless");
            None
        };

        let mut adapter = Self {
            root,
            mesh_path,
            lip_indices: [None; 5],
            expression_indices: Vec::new(),
            current_phoneme: None,
            transition_progress: 0.0,
            transition_duration: transition_duration.max(MIN_TRANSITION_SECS),
        };
        adapter.resolve_indices();
        adapter
    }

    fn resolve_indices(&mut self) {
        let Some(mesh) = self.mesh() else {
            return;
        };

        let mut lip_indices = [None; 5];
        for (slot, target) in LIP_SYNC_TARGETS.iter().enumerate() {
            lip_indices[slot] = mesh.morph_targets.get(*target).copied();
        }

        // Emotion may only touch channels the lip-sync pass never writes
        let expression_indices: Vec<usize> = EXPRESSION_TARGETS
            .iter()
            .filter_map(|target| mesh.morph_targets.get(*target).copied())
            .filter(|idx| !lip_indices.contains(&Some(*idx)))
            .collect();

        debug!(
            mesh = %mesh.name,
            lip_targets = lip_indices.iter().filter(|i| i.is_some()).count(),
            expression_targets = expression_indices.len(),
            "face mesh discovered"
        );

        self.lip_indices = lip_indices;
        self.expression_indices = expression_indices;
    }

    /// The discovered face mesh, if any.
    pub fn mesh(&self) -> Option<&MorphMesh> {
        let path = self.mesh_path.as_ref()?;
        let mut node = &self.root;
        for idx in path {
            node = node.children.get(*idx)?;
        }
        node.mesh.as_ref()
    }

    fn mesh_mut(&mut self) -> Option<&mut MorphMesh> {
        let path = self.mesh_path.as_ref()?;
        let mut node = &mut self.root;
        for idx in path {
            node = node.children.get_mut(*idx)?;
        }
        node.mesh.as_mut()
    }

    pub fn current_phoneme(&self) -> Option<&str> {
        self.current_phoneme.as_deref()
    }

    pub fn transition_progress(&self) -> f32 {
        self.transition_progress
    }

    /// Resolve the active phoneme for a playhead position: the first event
    /// whose span contains it, or the rest token past all events.
    fn active_phoneme<'a>(track: &'a [PhonemeEvent], playhead: f64) -> &'a str {
        track
            .iter()
            .find(|event| event.start <= playhead && playhead <= event.end)
            .map(|event| event.phoneme.as_str())
            .unwrap_or(REST_PHONEME)
    }

    /// One lip-sync tick. Returns the weights that were applied so the
    /// emotion pass can build on the same state.
    fn lip_sync_pass(&mut self, track: &[PhonemeEvent], playhead: f64) -> Option<MorphWeightSet> {
        self.mesh_path.as_ref()?;

        let phoneme = Self::active_phoneme(track, playhead);
        if self.current_phoneme.as_deref() != Some(phoneme) {
            self.current_phoneme = Some(phoneme.to_string());
            self.transition_progress = 0.0;
        }

        let increment = (1.0 / (self.transition_duration * TICK_RATE)) as f32;
        self.transition_progress = (self.transition_progress + increment).min(1.0);

        // Fading from rest into the target shape scales it by the progress
        let phoneme = self.current_phoneme.clone().unwrap_or_default();
        let weights = PhonemeMapper::interpolate(REST_PHONEME, &phoneme, self.transition_progress);

        let lip_indices = self.lip_indices;
        let mesh = self.mesh_mut()?;
        for influence in mesh.influences.iter_mut() {
            *influence = 0.0;
        }
        for (slot, index) in lip_indices.iter().enumerate() {
            if let Some(index) = index {
                if let Some(influence) = mesh.influences.get_mut(*index) {
                    *influence = weights.values()[slot];
                }
            }
        }

        Some(weights)
    }
}

fn find_morph_mesh(node: &SceneNode, path: &mut Vec<usize>) -> bool {
    if let Some(mesh) = &node.mesh {
        if !mesh.morph_targets.is_empty() {
            return true;
        }
    }
    for (idx, child) in node.children.iter().enumerate() {
        path.push(idx);
        if find_morph_mesh(child, path) {
            return true;
        }
        path.pop();
    }
    false
}

impl AvatarAdapter for MorphTargetAdapter {
    fn animate(&mut self, track: &[PhonemeEvent], playhead: f64) {
        self.lip_sync_pass(track, playhead);
    }

    fn animate_with_emotion(
        &mut self,
        track: &[PhonemeEvent],
        playhead: f64,
        emotion: &[f32],
    ) -> Result<(), AnimationError> {
        if self.lip_sync_pass(track, playhead).is_none() {
            // Headless mode: emotion blending is a no-op too
            return Ok(());
        }

        let expression_indices = self.expression_indices.clone();
        let Some(mesh) = self.mesh_mut() else {
            return Ok(());
        };

        // The emotion vector is bounded by the expression channels present;
        // anything beyond is ignored
        for (value, index) in emotion.iter().zip(expression_indices.iter()) {
            if let Some(influence) = mesh.influences.get_mut(*index) {
                *influence = (*influence + value * EMOTION_INFLUENCE).clamp(0.0, 1.0);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.current_phoneme = None;
        self.transition_progress = 0.0;
        if let Some(mesh) = self.mesh_mut() {
            for influence in mesh.influences.iter_mut() {
                *influence = 0.0;
            }
        }
    }

    fn morph_target_for_phoneme(&self, phoneme: &str) -> MorphWeightSet {
        PhonemeMapper::weights_for(phoneme)
    }
}

/// Bone-driven fallback for models without blend shapes. Approximates mouth
/// motion with a single jaw-open amount; emotion blending needs expression
/// morphs and is reported as unsupported.
pub struct SkeletalAdapter {
    jaw_open: f32,
    current_phoneme: Option<String>,
}

impl SkeletalAdapter {
    pub fn new() -> Self {
        Self {
            jaw_open: 0.0,
            current_phoneme: None,
        }
    }

    /// Jaw opening in [0, 1] derived from the active mouth shape.
    pub fn jaw_open(&self) -> f32 {
        self.jaw_open
    }
}

impl Default for SkeletalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AvatarAdapter for SkeletalAdapter {
    fn animate(&mut self, track: &[PhonemeEvent], playhead: f64) {
        let phoneme = MorphTargetAdapter::active_phoneme(track, playhead);
        self.current_phoneme = Some(phoneme.to_string());

        // The widest component of the mouth shape drives the jaw
        let weights = PhonemeMapper::weights_for(phoneme);
        self.jaw_open = weights
            .values()
            .iter()
            .fold(0.0_f32, |acc, w| acc.max(*w));
    }

    fn animate_with_emotion(
        &mut self,
        _track: &[PhonemeEvent],
        _playhead: f64,
        _emotion: &[f32],
    ) -> Result<(), AnimationError> {
        Err(AnimationError::Unsupported(
            "emotion blending requires morph targets",
        ))
    }

    fn reset(&mut self) {
        self.jaw_open = 0.0;
        self.current_phoneme = None;
    }

    fn morph_target_for_phoneme(&self, phoneme: &str) -> MorphWeightSet {
        PhonemeMapper::weights_for(phoneme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Face rig with the five visemes, three expressions and one unrelated
    /// channel, hung two levels deep to exercise discovery.
    fn face_rig() -> SceneNode {
        let mut targets = HashMap::new();
        for (i, name) in ["A", "E", "I", "O", "U", "joy", "angry", "sorrow", "blink"]
            .iter()
            .enumerate()
        {
            targets.insert(name.to_string(), i);
        }

        let mesh = MorphMesh {
            name: "Face".to_string(),
            morph_targets: targets,
            influences: vec![0.0; 9],
        };

        let mut face_node = SceneNode::named("head");
        face_node.mesh = Some(mesh);

        let mut body = SceneNode::named("body");
        body.children.push(SceneNode::named("hips"));
        body.children.push(face_node);

        let mut root = SceneNode::named("root");
        root.children.push(body);
        root
    }

    fn track() -> Vec<PhonemeEvent> {
        vec![
            PhonemeEvent::new("A", 0.0, 1.0),
            PhonemeEvent::new("E", 1.0, 2.0),
        ]
    }

    /// Run enough ticks at one playhead for the cross-fade to complete.
    fn settle(adapter: &mut MorphTargetAdapter, track: &[PhonemeEvent], playhead: f64) {
        for _ in 0..12 {
            adapter.animate(track, playhead);
        }
    }

    #[test]
    fn test_playhead_selects_phoneme() {
        let mut adapter = MorphTargetAdapter::new(face_rig(), 0.1);

        adapter.animate(&track(), 0.5);
        assert_eq!(adapter.current_phoneme(), Some("A"));

        adapter.animate(&track(), 1.5);
        assert_eq!(adapter.current_phoneme(), Some("E"));

        // Past all events: rest pose
        adapter.animate(&track(), 3.0);
        assert_eq!(adapter.current_phoneme(), Some(REST_PHONEME));
    }

    #[test]
    fn test_transition_ramps_to_full_weight() {
        let mut adapter = MorphTargetAdapter::new(face_rig(), 0.1);

        adapter.animate(&track(), 0.5);
        let first = adapter.mesh().unwrap().influences[0];
        assert!(first > 0.0 && first < 1.0, "first tick is partial: {}", first);

        settle(&mut adapter, &track(), 0.5);
        assert_eq!(adapter.mesh().unwrap().influences[0], 1.0);
        assert_eq!(adapter.transition_progress(), 1.0);
    }

    #[test]
    fn test_phoneme_change_resets_transition() {
        let mut adapter = MorphTargetAdapter::new(face_rig(), 0.1);
        settle(&mut adapter, &track(), 0.5);
        assert_eq!(adapter.transition_progress(), 1.0);

        adapter.animate(&track(), 1.5);
        assert!(adapter.transition_progress() < 1.0);
        assert_eq!(adapter.current_phoneme(), Some("E"));
    }

    #[test]
    fn test_stale_influences_are_zeroed() {
        let mut rig = face_rig();
        // Pre-set an unrelated channel as if a previous expression ran
        rig.children[0].children[1].mesh.as_mut().unwrap().influences[8] = 0.5;

        let mut adapter = MorphTargetAdapter::new(rig, 0.1);
        adapter.animate(&track(), 0.5);

        let influences = &adapter.mesh().unwrap().influences;
        assert_eq!(influences[8], 0.0, "blink channel must be cleared");
        assert!(influences[0] > 0.0);
    }

    #[test]
    fn test_emotion_blends_only_expression_channels() {
        let mut adapter = MorphTargetAdapter::new(face_rig(), 0.1);
        settle(&mut adapter, &track(), 0.5);

        adapter
            .animate_with_emotion(&track(), 0.5, &[1.0, 0.5])
            .unwrap();

        let influences = &adapter.mesh().unwrap().influences;
        // Lip channel untouched by the emotion pass
        assert_eq!(influences[0], 1.0);
        // joy and angry picked up the scaled emotion, sorrow got nothing
        assert!((influences[5] - EMOTION_INFLUENCE).abs() < 1e-6);
        assert!((influences[6] - 0.5 * EMOTION_INFLUENCE).abs() < 1e-6);
        assert_eq!(influences[7], 0.0);
    }

    #[test]
    fn test_oversized_emotion_vector_is_bounded() {
        let mut adapter = MorphTargetAdapter::new(face_rig(), 0.1);
        // Six entries against three expression channels: extras ignored
        adapter
            .animate_with_emotion(&track(), 0.5, &[1.0, 1.0, 1.0, 9.0, 9.0, 9.0])
            .unwrap();
        let influences = &adapter.mesh().unwrap().influences;
        assert!(influences.iter().all(|w| (0.0..=1.0).contains(w)));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut adapter = MorphTargetAdapter::new(face_rig(), 0.1);
        settle(&mut adapter, &track(), 0.5);
        adapter.reset();

        assert!(adapter.current_phoneme().is_none());
        assert_eq!(adapter.transition_progress(), 0.0);
        assert!(adapter
            .mesh()
            .unwrap()
            .influences
            .iter()
            .all(|w| *w == 0.0));
    }

    #[test]
    fn test_headless_model_never_panics() {
        // A rig with no morph meshes anywhere
        let mut root = SceneNode::named("root");
        root.children.push(SceneNode::named("empty"));

        let mut adapter = MorphTargetAdapter::new(root, 0.1);
        adapter.animate(&track(), 0.5);
        adapter
            .animate_with_emotion(&track(), 0.5, &[1.0])
            .unwrap();
        adapter.reset();

        assert!(adapter.mesh().is_none());
        // The pure lookup still works without a mesh
        assert!(!adapter.morph_target_for_phoneme("A").is_neutral());
    }

    #[test]
    fn test_zero_transition_duration_is_clamped() {
        let mut adapter = MorphTargetAdapter::new(face_rig(), 0.0);
        // One tick at the minimum duration completes the fade outright
        adapter.animate(&track(), 0.5);
        assert_eq!(adapter.transition_progress(), 1.0);
    }

    #[test]
    fn test_skeletal_adapter_tracks_jaw() {
        let mut adapter = SkeletalAdapter::new();
        adapter.animate(&track(), 0.5);
        assert_eq!(adapter.jaw_open(), 1.0);

        adapter.animate(&track(), 3.0);
        assert_eq!(adapter.jaw_open(), 0.0);
    }

    #[test]
    fn test_skeletal_adapter_reports_unsupported_emotion() {
        let mut adapter = SkeletalAdapter::new();
        let err = adapter
            .animate_with_emotion(&track(), 0.5, &[1.0])
            .unwrap_err();
        assert!(matches!(err, AnimationError::Unsupported(_)));
    }
}
