//! # Phoneme to Viseme Mapping
//!
//! Pure lookup from a phoneme label to mouth-shape morph weights, plus
//! linear interpolation between two phoneme states. No I/O and no state
//! beyond the static table, so the animation loop can call this every tick
//! without ever failing.

/// Names of the lip-sync morph targets, in table order.
pub const LIP_SYNC_TARGETS: [&str; 5] = ["A", "E", "I", "O", "U"];

/// Token for the neutral rest pose; deliberately absent from the viseme
/// table so it resolves to the all-zero set.
pub const REST_PHONEME: &str = "rest";

/// Weights for the lip-sync morph targets, each in [0, 1].
///
/// Produced fresh per animation tick and never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphWeightSet {
    values: [f32; 5],
}

impl MorphWeightSet {
    pub const NEUTRAL: MorphWeightSet = MorphWeightSet { values: [0.0; 5] };

    pub fn new(values: [f32; 5]) -> Self {
        Self { values }
    }

    /// Weight for a named target, zero for anything outside the lip-sync set.
    pub fn get(&self, target: &str) -> f32 {
        LIP_SYNC_TARGETS
            .iter()
            .position(|t| *t == target)
            .map(|i| self.values[i])
            .unwrap_or(0.0)
    }

    /// (target name, weight) pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        LIP_SYNC_TARGETS
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }

    pub fn values(&self) -> &[f32; 5] {
        &self.values
    }

    pub fn is_neutral(&self) -> bool {
        self.values.iter().all(|w| *w == 0.0)
    }
}

/// Static phoneme-to-viseme table with interpolation.
pub struct PhonemeMapper;

impl PhonemeMapper {
    /// Look up the mouth shape for a phoneme label.
    ///
    /// Labels are case-sensitive. The empty or whitespace token and any
    /// unrecognized label degrade to the neutral set instead of failing, so
    /// malformed timing data can never stall the animation loop.
    pub fn weights_for(phoneme: &str) -> MorphWeightSet {
        let token = phoneme.trim();
        if token.is_empty() {
            return MorphWeightSet::NEUTRAL;
        }

        // Weights are [A, E, I, O, U]. Vowels map fully onto their target;
        // consonant groups get the partial shapes a mouth actually makes.
        let values = match token {
            "A" | "AA" | "AE" | "AH" | "AY" => [1.0, 0.0, 0.0, 0.0, 0.0],
            "E" | "EH" | "EY" => [0.0, 1.0, 0.0, 0.0, 0.0],
            "I" | "IY" | "IH" => [0.0, 0.0, 1.0, 0.0, 0.0],
            "O" | "OW" | "AO" | "OY" => [0.0, 0.0, 0.0, 1.0, 0.0],
            "U" | "UW" | "UH" | "W" => [0.0, 0.0, 0.0, 0.0, 1.0],

            // Bilabial closure: lips shut, same as rest
            "M" | "B" | "P" => [0.0, 0.0, 0.0, 0.0, 0.0],

            "F" | "V" => [0.0, 0.3, 0.2, 0.0, 0.0],
            "L" | "N" | "T" | "D" | "S" | "Z" => [0.0, 0.35, 0.25, 0.0, 0.0],
            "TH" | "DH" => [0.15, 0.25, 0.0, 0.0, 0.0],
            "CH" | "JH" | "SH" | "ZH" => [0.0, 0.2, 0.0, 0.3, 0.0],
            "R" | "ER" => [0.0, 0.0, 0.0, 0.4, 0.3],
            "K" | "G" | "NG" => [0.25, 0.0, 0.0, 0.0, 0.0],
            "HH" => [0.2, 0.0, 0.0, 0.0, 0.0],

            _ => return MorphWeightSet::NEUTRAL,
        };

        MorphWeightSet::new(values)
    }

    /// Per-target linear interpolation between two phoneme states.
    ///
    /// `t = 0` yields `from`, `t = 1` yields `to`; unknown labels resolve to
    /// neutral first, so interpolating out of or into silence just fades.
    /// Deterministic and pure.
    pub fn interpolate(from: &str, to: &str, t: f32) -> MorphWeightSet {
        let t = t.clamp(0.0, 1.0);
        let from = Self::weights_for(from);
        let to = Self::weights_for(to);

        let mut values = [0.0; 5];
        for i in 0..values.len() {
            values[i] = from.values[i] * (1.0 - t) + to.values[i] * t;
        }
        MorphWeightSet::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vowels_map_to_their_target() {
        for (phoneme, target) in [("A", "A"), ("EH", "E"), ("IY", "I"), ("OW", "O"), ("UW", "U")] {
            let weights = PhonemeMapper::weights_for(phoneme);
            assert_eq!(weights.get(target), 1.0, "phoneme {}", phoneme);
        }
    }

    #[test]
    fn test_unknown_and_empty_degrade_to_neutral() {
        for token in ["", "   ", "XYZZY", "rest", "a"] {
            assert!(
                PhonemeMapper::weights_for(token).is_neutral(),
                "token {:?} should be neutral",
                token
            );
        }
    }

    #[test]
    fn test_labels_are_case_sensitive() {
        // Lowercase vowels are not table entries
        assert!(PhonemeMapper::weights_for("aa").is_neutral());
        assert!(!PhonemeMapper::weights_for("AA").is_neutral());
    }

    #[test]
    fn test_interpolating_phoneme_with_itself_is_identity() {
        for t in [0.0, 0.25, 0.5, 1.0] {
            assert_eq!(
                PhonemeMapper::interpolate("O", "O", t),
                PhonemeMapper::weights_for("O")
            );
        }
    }

    #[test]
    fn test_interpolation_endpoints_and_midpoint() {
        assert_eq!(
            PhonemeMapper::interpolate("A", "E", 0.0),
            PhonemeMapper::weights_for("A")
        );
        assert_eq!(
            PhonemeMapper::interpolate("A", "E", 1.0),
            PhonemeMapper::weights_for("E")
        );

        let mid = PhonemeMapper::interpolate("A", "E", 0.5);
        assert!((mid.get("A") - 0.5).abs() < 1e-6);
        assert!((mid.get("E") - 0.5).abs() < 1e-6);
        assert_eq!(mid.get("I"), 0.0);
    }

    #[test]
    fn test_interpolation_clamps_t() {
        assert_eq!(
            PhonemeMapper::interpolate("A", "E", -1.0),
            PhonemeMapper::weights_for("A")
        );
        assert_eq!(
            PhonemeMapper::interpolate("A", "E", 2.0),
            PhonemeMapper::weights_for("E")
        );
    }

    #[test]
    fn test_rest_fades_in_target() {
        // Fading out of silence scales the target shape linearly
        let partial = PhonemeMapper::interpolate(REST_PHONEME, "U", 0.4);
        assert!((partial.get("U") - 0.4).abs() < 1e-6);
        assert_eq!(partial.get("A"), 0.0);
    }

    #[test]
    fn test_consonants_stay_subtle() {
        // Partial shapes never dominate a full vowel
        for token in ["F", "S", "R", "K", "TH", "CH"] {
            let weights = PhonemeMapper::weights_for(token);
            assert!(
                weights.values().iter().all(|w| *w < 0.5),
                "consonant {} too strong",
                token
            );
        }
    }
}
