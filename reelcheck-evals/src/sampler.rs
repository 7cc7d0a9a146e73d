//! Frame sampling policies.
//!
//! Reduces an ordered frame sequence to a bounded subset before it is sent to
//! a model. Pure and deterministic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Policy for choosing which frames to send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Evenly spaced across the whole video.
    #[default]
    Even,
    /// Every frame, ignoring the bound.
    All,
    /// The first `max_frames` frames.
    FirstN,
    /// The last `max_frames` frames.
    LastN,
}

impl SamplingStrategy {
    /// Token used in config files, CLI flags, and result metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Even => "even",
            Self::All => "all",
            Self::FirstN => "first_n",
            Self::LastN => "last_n",
        }
    }
}

impl fmt::Display for SamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "even" => Ok(Self::Even),
            "all" => Ok(Self::All),
            "first_n" => Ok(Self::FirstN),
            "last_n" => Ok(Self::LastN),
            other => Err(Error::InvalidStrategy(other.to_string())),
        }
    }
}

/// Strategy plus bound, as carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSelection {
    pub strategy: SamplingStrategy,
    pub max_frames: usize,
}

impl FrameSelection {
    pub fn new(strategy: SamplingStrategy, max_frames: usize) -> Self {
        Self {
            strategy,
            max_frames,
        }
    }

    /// Apply this selection to a frame list.
    pub fn apply<T: Clone>(&self, frames: &[T]) -> Vec<T> {
        sample(frames, self.strategy, self.max_frames)
    }
}

/// Reduce `frames` to at most `max_frames` elements under `strategy`.
///
/// When `frames.len() <= max_frames` the input is returned unchanged for
/// every strategy. `Even` picks indices `floor(i * len / max_frames)`, which
/// always includes index 0 but not necessarily the last frame.
pub fn sample<T: Clone>(frames: &[T], strategy: SamplingStrategy, max_frames: usize) -> Vec<T> {
    if frames.len() <= max_frames {
        return frames.to_vec();
    }

    match strategy {
        SamplingStrategy::All => frames.to_vec(),
        SamplingStrategy::FirstN => frames[..max_frames].to_vec(),
        SamplingStrategy::LastN => frames[frames.len() - max_frames..].to_vec(),
        // floor(i * step) with step = len / max_frames, kept in integers.
        SamplingStrategy::Even => (0..max_frames)
            .map(|i| frames[i * frames.len() / max_frames].clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn short_input_is_returned_unchanged_for_every_strategy() {
        let input = frames(10);
        for strategy in [
            SamplingStrategy::Even,
            SamplingStrategy::All,
            SamplingStrategy::FirstN,
            SamplingStrategy::LastN,
        ] {
            assert_eq!(sample(&input, strategy, 10), input);
            assert_eq!(sample(&input, strategy, 50), input);
        }
    }

    #[test]
    fn even_sampling_of_45_frames_to_30() {
        let picked = sample(&frames(45), SamplingStrategy::Even, 30);
        assert_eq!(picked.len(), 30);
        assert_eq!(picked[0], 0);
        assert_eq!(picked[1], 1);
        assert_eq!(picked[2], 3);
        assert!(*picked.last().unwrap() < 44);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn even_sampling_holds_for_many_sizes() {
        for len in 1..120 {
            for max in 1..=len {
                let picked = sample(&frames(len), SamplingStrategy::Even, max);
                assert_eq!(picked.len(), max, "len={len} max={max}");
                assert_eq!(picked[0], 0);
                assert!(picked.windows(2).all(|w| w[0] < w[1]), "len={len} max={max}");
            }
        }
    }

    #[test]
    fn first_and_last_n_slice() {
        let input = frames(20);
        assert_eq!(sample(&input, SamplingStrategy::FirstN, 3), vec![0, 1, 2]);
        assert_eq!(sample(&input, SamplingStrategy::LastN, 3), vec![17, 18, 19]);
    }

    #[test]
    fn all_ignores_bound() {
        let input = frames(200);
        assert_eq!(sample(&input, SamplingStrategy::All, 30).len(), 200);
    }

    #[test]
    fn strategy_tokens_round_trip() {
        for token in ["even", "all", "first_n", "last_n"] {
            let strategy: SamplingStrategy = token.parse().unwrap();
            assert_eq!(strategy.to_string(), token);
        }
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = "random".parse::<SamplingStrategy>().unwrap_err();
        assert!(matches!(err, Error::InvalidStrategy(ref s) if s == "random"));
    }

    #[test]
    fn selection_applies_strategy() {
        let sel = FrameSelection::new(SamplingStrategy::LastN, 2);
        assert_eq!(sel.apply(&frames(5)), vec![3, 4]);
    }
}
