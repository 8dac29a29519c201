// SPDX-License-Identifier: MIT OR Apache-2.0
//! Schedule configuration.
//!
//! This module covers:
//! - [`ScheduleConfig`]: validated initial delay and stagger interval
//! - [`ScheduleSettings`]: the serializable (RON) form of that config
//! - [`TransitionPlan`]: config plus the sequence supplier, built with
//!   [`TransitionPlanBuilder`]

use crate::runner::Transition;
use crate::timing::TimingModel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Produces the transition sequence for a target.
///
/// Called with `None` to read durations only. Durations must not depend on
/// which target is passed.
pub type SequenceSupplier<T, Tr> = Box<dyn Fn(Option<&T>) -> Vec<Tr>>;

/// Validated timing parameters, fixed for a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScheduleConfig {
    initial_delay: Duration,
    stagger_interval: Duration,
}

impl ScheduleConfig {
    /// Create a config from non-negative durations
    pub fn new(initial_delay: Duration, stagger_interval: Duration) -> Self {
        Self {
            initial_delay,
            stagger_interval,
        }
    }

    /// Create a config from signed milliseconds, rejecting negative values
    pub fn from_millis(initial_delay_ms: i64, stagger_interval_ms: i64) -> Result<Self, ConfigError> {
        let initial_delay = u64::try_from(initial_delay_ms)
            .map_err(|_| ConfigError::NegativeInitialDelay(initial_delay_ms))?;
        let stagger_interval = u64::try_from(stagger_interval_ms)
            .map_err(|_| ConfigError::NegativeStaggerInterval(stagger_interval_ms))?;

        Ok(Self::new(
            Duration::from_millis(initial_delay),
            Duration::from_millis(stagger_interval),
        ))
    }

    /// Delay before the first slot's first transition
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Start offset added per slot ordinal
    pub fn stagger_interval(&self) -> Duration {
        self.stagger_interval
    }
}

impl TryFrom<ScheduleSettings> for ScheduleConfig {
    type Error = ConfigError;

    fn try_from(settings: ScheduleSettings) -> Result<Self, Self::Error> {
        settings.validate()
    }
}

/// Serializable schedule settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Delay before the first transition of the first slot, in milliseconds
    pub initial_delay_ms: i64,
    /// Start offset per slot ordinal, in milliseconds
    pub stagger_interval_ms: i64,
}

impl ScheduleSettings {
    /// Create settings from milliseconds
    pub fn new(initial_delay_ms: i64, stagger_interval_ms: i64) -> Self {
        Self {
            initial_delay_ms,
            stagger_interval_ms,
        }
    }

    /// Validate into a [`ScheduleConfig`]
    pub fn validate(&self) -> Result<ScheduleConfig, ConfigError> {
        ScheduleConfig::from_millis(self.initial_delay_ms, self.stagger_interval_ms)
    }

    /// Parse settings from RON
    pub fn from_ron(source: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(source)?)
    }

    /// Serialize settings to pretty RON
    pub fn to_ron(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }
}

impl From<ScheduleConfig> for ScheduleSettings {
    fn from(config: ScheduleConfig) -> Self {
        let millis = |d: Duration| i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
        Self::new(millis(config.initial_delay), millis(config.stagger_interval))
    }
}

/// Errors rejected at configuration time
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Initial delay below zero
    #[error("Initial delay must not be negative: {0} ms")]
    NegativeInitialDelay(i64),

    /// Stagger interval below zero
    #[error("Stagger interval must not be negative: {0} ms")]
    NegativeStaggerInterval(i64),

    /// No sequence supplier was provided
    #[error("No transition sequence supplier configured")]
    MissingSupplier,

    /// Settings could not be parsed
    #[error("Invalid schedule settings: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Settings could not be serialized
    #[error("Failed to serialize schedule settings: {0}")]
    Serialize(#[from] ron::Error),
}

/// Sequence supplier together with its schedule config
pub struct TransitionPlan<T, Tr> {
    config: ScheduleConfig,
    supplier: SequenceSupplier<T, Tr>,
}

impl<T, Tr: Transition> TransitionPlan<T, Tr> {
    /// Start building a plan
    pub fn builder() -> TransitionPlanBuilder<T, Tr> {
        TransitionPlanBuilder::new()
    }

    /// Create a plan from a validated config
    pub fn new(
        config: ScheduleConfig,
        supplier: impl Fn(Option<&T>) -> Vec<Tr> + 'static,
    ) -> Self {
        Self {
            config,
            supplier: Box::new(supplier),
        }
    }

    /// Schedule config
    pub fn config(&self) -> ScheduleConfig {
        self.config
    }

    /// Sequence for a concrete target
    pub fn transitions(&self, target: &T) -> Vec<Tr> {
        (self.supplier)(Some(target))
    }

    /// Sequence obtained without a target, for duration queries
    pub fn dummy_transitions(&self) -> Vec<Tr> {
        (self.supplier)(None)
    }

    /// Timing model over the plan's durations
    pub fn timing(&self) -> TimingModel {
        TimingModel::from_sequence(self.config, &self.dummy_transitions())
    }
}

impl<T, Tr> fmt::Debug for TransitionPlan<T, Tr> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionPlan")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TransitionPlan`]
pub struct TransitionPlanBuilder<T, Tr> {
    config: Result<ScheduleConfig, ConfigError>,
    supplier: Option<SequenceSupplier<T, Tr>>,
}

impl<T, Tr: Transition> TransitionPlanBuilder<T, Tr> {
    /// Create a builder with zero delays and no supplier
    pub fn new() -> Self {
        Self {
            config: Ok(ScheduleConfig::default()),
            supplier: None,
        }
    }

    /// Use a validated config
    pub fn config(mut self, config: ScheduleConfig) -> Self {
        self.config = Ok(config);
        self
    }

    /// Use signed millisecond delays; negative values fail at [`build`](Self::build)
    pub fn delays_ms(mut self, initial_delay_ms: i64, stagger_interval_ms: i64) -> Self {
        self.config = ScheduleConfig::from_millis(initial_delay_ms, stagger_interval_ms);
        self
    }

    /// Use deserialized settings; invalid values fail at [`build`](Self::build)
    pub fn settings(mut self, settings: ScheduleSettings) -> Self {
        self.config = settings.validate();
        self
    }

    /// Set the sequence supplier
    pub fn supplier(mut self, supplier: impl Fn(Option<&T>) -> Vec<Tr> + 'static) -> Self {
        self.supplier = Some(Box::new(supplier));
        self
    }

    /// Validate and build the plan
    pub fn build(self) -> Result<TransitionPlan<T, Tr>, ConfigError> {
        let config = self.config?;
        let supplier = self.supplier.ok_or(ConfigError::MissingSupplier)?;
        Ok(TransitionPlan { config, supplier })
    }
}

impl<T, Tr: Transition> Default for TransitionPlanBuilder<T, Tr> {
    fn default() -> Self {
        Self::new()
    }
}
