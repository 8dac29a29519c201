// SPDX-License-Identifier: MIT OR Apache-2.0
//! Demo settings, loadable from a RON file.

use serde::{Deserialize, Serialize};
use serial_scheduler::ScheduleSettings;
use std::path::Path;
use std::time::Duration;

/// Simulation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Initial delay and stagger interval
    pub schedule: ScheduleSettings,
    /// Durations of the transition sequence, in milliseconds
    pub transitions_ms: Vec<u64>,
    /// Rows in the simulated data set
    pub rows: usize,
    /// Rows that fit in the viewport
    pub visible_rows: usize,
    /// Simulation step, in milliseconds
    pub tick_ms: u64,
    /// Scroll one row this often; zero disables scrolling
    pub scroll_every_ms: u64,
    /// Total simulated time, in milliseconds
    pub duration_ms: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            schedule: ScheduleSettings::new(0, 50),
            transitions_ms: vec![100, 200, 150],
            rows: 40,
            visible_rows: 8,
            tick_ms: 10,
            scroll_every_ms: 120,
            duration_ms: 2000,
        }
    }
}

impl DemoSettings {
    /// Load settings from a file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        ron::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        let content = ron::ser::to_string_pretty(self, config)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }

    /// Transition sequence as durations
    pub fn transitions(&self) -> Vec<Duration> {
        self.transitions_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}
