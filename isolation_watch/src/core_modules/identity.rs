// THEORY:
// The engine has no real tracker. Instead, a person's identity is approximated by
// the grid cell their centroid falls into. A person who moves less than a cell
// between frames keeps their identity; two people inside the same cell share one.
// This is a deliberate approximation and must stay exactly as coarse as it is:
// the engagement state machine depends on the `IdentityResolver` trait only, so a
// real tracker can replace `GridBinResolver` without touching anything else.

use crate::core_modules::detection::Detection;
use std::fmt;

/// A positional proxy for a person's identity: the grid cell holding their centroid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoarseIdentity {
    pub x: i32,
    pub y: i32,
}

impl fmt::Display for CoarseIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.x, self.y)
    }
}

/// Maps a detection to the identity it is known by across frames.
pub trait IdentityResolver {
    fn resolve(&self, detection: &Detection) -> CoarseIdentity;
}

/// Spatial binning resolver: `(floor(cx / bin), floor(cy / bin))`.
#[derive(Debug, Clone, Copy)]
pub struct GridBinResolver {
    bin_size: i32,
}

impl GridBinResolver {
    /// `bin_size` is clamped to at least one pixel.
    pub fn new(bin_size: u32) -> Self {
        let bin_size = i32::try_from(bin_size.max(1)).unwrap_or(i32::MAX);
        Self { bin_size }
    }
}

impl IdentityResolver for GridBinResolver {
    fn resolve(&self, detection: &Detection) -> CoarseIdentity {
        CoarseIdentity {
            x: detection.center_x.div_euclid(self.bin_size),
            y: detection.center_y.div_euclid(self.bin_size),
        }
    }
}
