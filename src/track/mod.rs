//! Track-circuit graph: sections, control objects and traversal.
//!
//! The graph is loaded once and is read-mostly. The core owns only the
//! per-section reservation state ([`CircuitState`]), the deadlock traps and
//! the active switch pins; geometry never changes at run time.
//!
//! # Submodules
//!
//! - `section`: [`TrackSection`] and its reservation state
//! - `signal`: [`SignalObject`] (signals and speed posts) and [`Aspect`]
//! - `graph`: [`TrackGraph`] arena, builder API, traversal and object scans
//!
//! # Pin Convention
//!
//! `pins[d][k]` is the `k`-th section reached when leaving a section while
//! travelling in [`Direction`] `d`. A junction has two links at its facing
//! end; `switch_position` selects the one a movement takes.

pub mod graph;
pub mod section;
pub mod signal;

pub use graph::*;
pub use section::*;
pub use signal::*;

/// Direction of traversal through a track section.
///
/// Sections have an arbitrary but fixed orientation; `Forward` runs from
/// offset 0 to the section length.
///
/// # Default
///
/// Defaults to [`Forward`](Self::Forward).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// Along the section orientation.
    #[default]
    Forward,
    /// Against the section orientation.
    Reverse,
}

impl Direction {
    /// Array index for per-direction tables (`Forward` = 0).
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }

    /// Direction for a per-direction table index.
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        if index == 0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    /// The opposite direction.
    #[inline]
    pub const fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    /// Returns the direction as a lowercase string.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_authority::track::Direction;
    ///
    /// assert_eq!(Direction::Forward.as_str(), "forward");
    /// assert_eq!(Direction::Reverse.as_str(), "reverse");
    /// ```
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }

    /// Parse direction from text input.
    ///
    /// Accepts `"forward"`/`"fwd"`/`"0"` and `"reverse"`/`"rev"`/`"1"`,
    /// trimmed and case-insensitive.
    ///
    /// ```
    /// use rs_authority::track::Direction;
    ///
    /// assert_eq!(Direction::from_text(" FWD "), Some(Direction::Forward));
    /// assert_eq!(Direction::from_text("1"), Some(Direction::Reverse));
    /// assert_eq!(Direction::from_text("sideways"), None);
    /// ```
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" | "fwd" | "0" => Some(Direction::Forward),
            "reverse" | "rev" | "1" => Some(Direction::Reverse),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_reverse_is_involution() {
        assert_eq!(Direction::Forward.reverse(), Direction::Reverse);
        assert_eq!(Direction::Forward.reverse().reverse(), Direction::Forward);
    }

    #[test]
    fn direction_index_round_trip() {
        for d in [Direction::Forward, Direction::Reverse] {
            assert_eq!(Direction::from_index(d.index()), d);
        }
    }
}
