//! Configuration for the control core, trains and the tick scheduler.
//!
//! Names use `heapless::String` so a [`TrainConfig`] stays a fixed-size,
//! copyable record that serializes the same way everywhere.
//!
//! # Example
//!
//! ```rust
//! use rs_authority::config::{Config, ControlConfig, SimulationConfig, TrainConfig};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.control.min_check_distance_m, 5000.0);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_control(ControlConfig::default().with_claim_wait_s(30.0))
//!     .with_simulation(SimulationConfig::default().with_tick_interval_s(0.5));
//!
//! let train = TrainConfig::default().with_name("Freight 12").with_freight(true);
//! assert!(train.is_freight);
//! ```

use heapless::String as HString;

/// Maximum length for short config strings (train names)
pub const MAX_SHORT_STRING: usize = 64;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

// ============================================================================
// Helper for creating heapless strings
// ============================================================================

/// Create a ShortString from a &str, truncating if too long
pub fn short_string(s: &str) -> ShortString {
    let mut hs = ShortString::new();
    let take = s.len().min(MAX_SHORT_STRING);
    // Find valid UTF-8 boundary
    let valid_end = s
        .char_indices()
        .take_while(|(i, _)| *i < take)
        .filter(|(i, c)| i + c.len_utf8() <= MAX_SHORT_STRING)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let _ = hs.push_str(&s[..valid_end]);
    hs
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete configuration of a simulation
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Authority and reservation parameters
    pub control: ControlConfig,
    /// Tick scheduler parameters
    pub simulation: SimulationConfig,
}

impl Config {
    /// Set control configuration
    pub fn with_control(mut self, control: ControlConfig) -> Self {
        self.control = control;
        self
    }

    /// Set simulation configuration
    pub fn with_simulation(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = simulation;
        self
    }
}

// ============================================================================
// Control Config
// ============================================================================

/// Authority, clearing and claim parameters shared by every train.
///
/// Distances are in metres, times in seconds, speeds in m/s.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlConfig {
    /// Lookahead threshold for automatic modes
    pub min_check_distance_m: f32,
    /// Path window length in manual and explorer mode
    pub min_check_distance_manual_m: f32,
    /// Node-mode authority time constant
    pub lookahead_time_s: f32,
    /// Floor for the node-mode extension threshold
    pub min_lookahead_m: f32,
    /// Clearing overlap for plain sections
    pub standard_overlap_m: f32,
    /// Clearing overlap for facing junctions and crossovers
    pub junction_overlap_m: f32,
    /// Hysteresis for backward-movement detection
    pub backward_threshold_m: f32,
    /// Distance behind the rear searched for a protecting signal
    pub rear_signal_overlap_m: f32,
    /// Stationary wait at a red signal before raising a claim
    pub claim_wait_s: f32,
    /// Speed below which a train counts as stationary
    pub stationary_speed_mps: f32,
    /// Speed read for "unrestricted" objects
    pub route_max_speed_mps: f32,
    /// Deceleration applied while out of control
    pub emergency_decel_mps2: f32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            min_check_distance_m: 5000.0,
            min_check_distance_manual_m: 3000.0,
            lookahead_time_s: 60.0,
            min_lookahead_m: 1000.0,
            standard_overlap_m: 15.0,
            junction_overlap_m: 75.0,
            backward_threshold_m: 5.0,
            rear_signal_overlap_m: 50.0,
            claim_wait_s: 60.0,
            stationary_speed_mps: 0.1,
            route_max_speed_mps: 40.0,
            emergency_decel_mps2: 1.5,
        }
    }
}

impl ControlConfig {
    /// Set the automatic-mode lookahead threshold
    pub fn with_min_check_distance_m(mut self, m: f32) -> Self {
        self.min_check_distance_m = m.max(0.0);
        self
    }

    /// Set the manual-mode window length
    pub fn with_min_check_distance_manual_m(mut self, m: f32) -> Self {
        self.min_check_distance_manual_m = m.max(0.0);
        self
    }

    /// Set the node-mode authority time constant
    pub fn with_lookahead_time_s(mut self, s: f32) -> Self {
        self.lookahead_time_s = s.max(0.0);
        self
    }

    /// Set the node-mode extension floor
    pub fn with_min_lookahead_m(mut self, m: f32) -> Self {
        self.min_lookahead_m = m.max(0.0);
        self
    }

    /// Set both clearing overlaps
    pub fn with_overlaps_m(mut self, standard: f32, junction: f32) -> Self {
        self.standard_overlap_m = standard.max(0.0);
        self.junction_overlap_m = junction.max(0.0);
        self
    }

    /// Set the backward-movement hysteresis
    pub fn with_backward_threshold_m(mut self, m: f32) -> Self {
        self.backward_threshold_m = m.max(0.0);
        self
    }

    /// Set the rear protecting-signal search distance
    pub fn with_rear_signal_overlap_m(mut self, m: f32) -> Self {
        self.rear_signal_overlap_m = m.max(0.0);
        self
    }

    /// Set the claim wait
    pub fn with_claim_wait_s(mut self, s: f32) -> Self {
        self.claim_wait_s = s.max(0.0);
        self
    }

    /// Set the stationary speed threshold
    pub fn with_stationary_speed_mps(mut self, mps: f32) -> Self {
        self.stationary_speed_mps = mps.max(0.0);
        self
    }

    /// Set the route maximum speed
    pub fn with_route_max_speed_mps(mut self, mps: f32) -> Self {
        self.route_max_speed_mps = mps.max(0.0);
        self
    }

    /// Set the emergency deceleration
    pub fn with_emergency_decel_mps2(mut self, mps2: f32) -> Self {
        self.emergency_decel_mps2 = mps2.max(0.01);
        self
    }

    /// True if `speed_mps` counts as stationary
    pub fn is_stationary(&self, speed_mps: f32) -> bool {
        speed_mps.abs() < self.stationary_speed_mps
    }
}

// ============================================================================
// Train Config
// ============================================================================

/// Per-train constants
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainConfig {
    /// Human-readable train name
    pub name: ShortString,
    /// Length from front to rear in metres
    pub length_m: f32,
    /// Maximum speed in m/s
    pub max_speed_mps: f32,
    /// Freight trains read the freight speed fields of signals and posts
    pub is_freight: bool,
    /// Static consists never move and are ignored by deadlock detection
    pub is_static: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            name: short_string("train"),
            length_m: 100.0,
            max_speed_mps: 30.0,
            is_freight: false,
            is_static: false,
        }
    }
}

impl TrainConfig {
    /// Set the train name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = short_string(name);
        self
    }

    /// Set the train length
    pub fn with_length_m(mut self, m: f32) -> Self {
        self.length_m = m.max(0.0);
        self
    }

    /// Set the maximum speed
    pub fn with_max_speed_mps(mut self, mps: f32) -> Self {
        self.max_speed_mps = mps.max(0.0);
        self
    }

    /// Mark as freight
    pub fn with_freight(mut self, freight: bool) -> Self {
        self.is_freight = freight;
        self
    }

    /// Mark as static
    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }
}

// ============================================================================
// Simulation Config
// ============================================================================

/// Tick scheduler configuration
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimulationConfig {
    /// Simulated time per tick in seconds
    pub tick_interval_s: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_s: 1.0,
        }
    }
}

impl SimulationConfig {
    /// Set the tick interval
    pub fn with_tick_interval_s(mut self, s: f32) -> Self {
        self.tick_interval_s = s.max(0.001);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
