// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File, FileFormat};
use duration_string::DurationString;
use serde::Deserialize;

use crate::bank::{BankSource, EmbeddedBank, FileBank};
use crate::middleware::simulated::SimulatorOptions;

mod error;

pub use error::ConfigError;

/// The event hosting 2D programmer sounds in the shipped bank.
pub const DEFAULT_SOUND_2D_EVENT: &str = "{2e2adb70-14df-4219-bb0d-b5c6ffd8fd4f}";

/// The event hosting 3D programmer sounds in the shipped bank.
pub const DEFAULT_SOUND_3D_EVENT: &str = "{6ced009f-0452-428d-9d94-994ae51660fc}";

/// The default interval between simulator updates.
const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(10);

/// Top level configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Settings {
    /// Path to the bank file. The embedded bank is used when absent.
    bank: Option<PathBuf>,
    #[serde(default)]
    events: EventIds,
    #[serde(default)]
    simulator: SimulatorSettings,

    /// Directory relative bank paths are resolved against.
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Settings {
    /// Loads settings from a YAML file, or returns the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = match path {
            Some(path) => path,
            None => return Ok(Settings::default()),
        };

        let mut settings: Settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        Ok(settings)
    }

    /// Parses settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Settings, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?)
    }

    /// Returns the configured bank path, resolved against the config file's directory.
    pub fn bank(&self) -> Option<PathBuf> {
        self.bank.as_ref().map(|bank| match &self.base_dir {
            Some(base) if bank.is_relative() => base.join(bank),
            _ => bank.clone(),
        })
    }

    /// Returns the source the bank will be read from.
    pub fn bank_source(&self) -> Box<dyn BankSource> {
        match self.bank() {
            Some(path) => Box::new(FileBank::new(path)),
            None => Box::new(EmbeddedBank),
        }
    }

    pub fn events(&self) -> &EventIds {
        &self.events
    }

    pub fn simulator(&self) -> &SimulatorSettings {
        &self.simulator
    }
}

/// The events programmer sounds are played through.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct EventIds {
    /// Event used for sounds without a position.
    pub sound_2d: String,
    /// Event used for positioned sounds.
    pub sound_3d: String,
}

impl Default for EventIds {
    fn default() -> Self {
        EventIds {
            sound_2d: DEFAULT_SOUND_2D_EVENT.to_string(),
            sound_3d: DEFAULT_SOUND_3D_EVENT.to_string(),
        }
    }
}

impl EventIds {
    /// Both event ids, 2D first.
    pub fn all(&self) -> Vec<String> {
        vec![self.sound_2d.clone(), self.sound_3d.clone()]
    }
}

/// Configuration for the simulated middleware.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct SimulatorSettings {
    ring_offset: Option<u32>,
    update_interval: Option<String>,
}

impl SimulatorSettings {
    pub fn ring_offset(&self) -> Option<u32> {
        self.ring_offset
    }

    /// Returns the update interval (default: 10ms).
    pub fn update_interval(&self) -> Result<Duration, ConfigError> {
        match &self.update_interval {
            Some(interval) => DurationString::from_string(interval.clone())
                .map(Into::into)
                .map_err(|e| ConfigError::Duration {
                    value: interval.clone(),
                    message: e.to_string(),
                }),
            None => Ok(DEFAULT_UPDATE_INTERVAL),
        }
    }

    pub fn options(&self) -> SimulatorOptions {
        SimulatorOptions {
            ring_offset: self.ring_offset,
            ..Default::default()
        }
    }
}
