//! # Component Descriptors
//!
//! Objects expose a tree of components. Instead of a subclass hierarchy,
//! every component is described by a kind tag plus capability predicates;
//! behavior that differs by kind lives in the kind-specific payload
//! variants (see [`crate::event::EventPayload`]).

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Component Kind
// =============================================================================

/// Kind tag for a component in an object's structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// A boolean sensor (reports true/false state).
    BooleanState,
    /// A boolean actuator (accepts on/off actions).
    BooleanAction,
    /// A numeric-range sensor.
    RangeState,
    /// A numeric-range actuator.
    RangeAction,
    /// A grouping node with child components, carries no values itself.
    Container,
}

impl ComponentKind {
    /// Returns true if components of this kind report state updates.
    pub fn carries_state(&self) -> bool {
        matches!(self, ComponentKind::BooleanState | ComponentKind::RangeState)
    }

    /// Returns true if components of this kind accept actions.
    pub fn accepts_actions(&self) -> bool {
        matches!(
            self,
            ComponentKind::BooleanAction | ComponentKind::RangeAction
        )
    }

    /// Returns true if components of this kind carry boolean payloads.
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            ComponentKind::BooleanState | ComponentKind::BooleanAction
        )
    }

    /// Returns true if components of this kind carry numeric-range payloads.
    pub fn is_range(&self) -> bool {
        matches!(self, ComponentKind::RangeState | ComponentKind::RangeAction)
    }

    /// Returns true for grouping nodes.
    pub fn is_container(&self) -> bool {
        matches!(self, ComponentKind::Container)
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::BooleanState => write!(f, "boolean_state"),
            ComponentKind::BooleanAction => write!(f, "boolean_action"),
            ComponentKind::RangeState => write!(f, "range_state"),
            ComponentKind::RangeAction => write!(f, "range_action"),
            ComponentKind::Container => write!(f, "container"),
        }
    }
}

impl std::str::FromStr for ComponentKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boolean_state" => Ok(ComponentKind::BooleanState),
            "boolean_action" => Ok(ComponentKind::BooleanAction),
            "range_state" => Ok(ComponentKind::RangeState),
            "range_action" => Ok(ComponentKind::RangeAction),
            "container" => Ok(ComponentKind::Container),
            other => Err(CoreError::InvalidComponentPath(format!(
                "unknown component kind '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// Component Descriptor
// =============================================================================

/// A component's position and kind within an object.
///
/// Paths are slash-separated, rooted at the object
/// (e.g. `lamp/brightness`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Slash-separated path from the object root.
    pub path: String,

    /// Kind tag.
    pub kind: ComponentKind,
}

impl ComponentDescriptor {
    /// Creates a descriptor after validating the path.
    pub fn new(path: &str, kind: ComponentKind) -> CoreResult<Self> {
        if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
            return Err(CoreError::InvalidComponentPath(path.to_string()));
        }
        if path.split('/').any(|seg| seg.is_empty()) {
            return Err(CoreError::InvalidComponentPath(path.to_string()));
        }

        Ok(ComponentDescriptor {
            path: path.to_string(),
            kind,
        })
    }

    /// Returns true if this component sits under the given prefix path.
    pub fn is_under(&self, prefix: &str) -> bool {
        self.path == prefix || self.path.starts_with(&format!("{}/", prefix))
    }
}

// =============================================================================
// Range Specification
// =============================================================================

/// Value bounds for a range component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    /// Lower bound (inclusive).
    pub min: f64,
    /// Upper bound (inclusive).
    pub max: f64,
}

impl RangeSpec {
    /// Creates a range spec; `min` must not exceed `max`.
    pub fn new(min: f64, max: f64) -> CoreResult<Self> {
        if min > max {
            return Err(CoreError::InvalidPayload(format!(
                "range min {} exceeds max {}",
                min, max
            )));
        }
        Ok(RangeSpec { min, max })
    }

    /// Span of the range.
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Clamps a value into the range.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Returns true if the value is within bounds.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Preset one third into the range.
    pub fn preset_low(&self) -> f64 {
        self.min + self.span() / 3.0
    }

    /// Preset two thirds into the range.
    pub fn preset_high(&self) -> f64 {
        self.min + 2.0 * self.span() / 3.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
