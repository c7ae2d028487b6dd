//! Engine configuration.

use crate::listener::EventRecorder;

/// Configuration for a [`ScopeManager`](crate::ScopeManager).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deepest allowed nesting level (the root is level 0).
    pub max_scope_depth: usize,

    /// Whether a bidirectional change completes an incomplete opposite
    /// collection end point before editing it.
    ///
    /// When disabled the opposite end point stays incomplete and the change
    /// is reconciled when that end point is eventually completed.
    pub complete_opposite_end_points: bool,

    /// Capacity of recorders created through [`EngineConfig::recorder`].
    pub event_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_scope_depth: 16,
            complete_opposite_end_points: true,
            event_history: 1024,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the deepest allowed nesting level.
    #[must_use]
    pub const fn max_scope_depth(mut self, depth: usize) -> Self {
        self.max_scope_depth = depth;
        self
    }

    /// Sets whether opposite collection end points are completed on demand.
    #[must_use]
    pub const fn complete_opposite_end_points(mut self, value: bool) -> Self {
        self.complete_opposite_end_points = value;
        self
    }

    /// Sets the recorder history capacity.
    #[must_use]
    pub const fn event_history(mut self, capacity: usize) -> Self {
        self.event_history = capacity;
        self
    }

    /// Creates an event recorder bounded by the configured history.
    #[must_use]
    pub fn recorder(&self) -> EventRecorder {
        EventRecorder::with_capacity(self.event_history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_scope_depth, 16);
        assert!(config.complete_opposite_end_points);
        assert_eq!(config.event_history, 1024);
    }

    #[test]
    fn builder_pattern() {
        let config = EngineConfig::new()
            .max_scope_depth(2)
            .complete_opposite_end_points(false)
            .event_history(8);

        assert_eq!(config.max_scope_depth, 2);
        assert!(!config.complete_opposite_end_points);
        assert_eq!(config.event_history, 8);
    }
}
