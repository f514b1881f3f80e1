//! The three status axes of a service, plus the hook stages used in errors and logs.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigurationStatus {
    #[default]
    Unconfigured,
    Configuring,
    Configured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GlobalStatus {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
    Swapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatingStatus {
    #[default]
    Idle,
    Updating,
}

/// Component hook being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuring,
    Starting,
    Stopping,
    Updating,
    Swapping,
}

impl fmt::Display for ConfigurationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigurationStatus::Unconfigured => "UNCONFIGURED",
            ConfigurationStatus::Configuring => "CONFIGURING",
            ConfigurationStatus::Configured => "CONFIGURED",
        })
    }
}

impl fmt::Display for GlobalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GlobalStatus::Stopped => "STOPPED",
            GlobalStatus::Starting => "STARTING",
            GlobalStatus::Started => "STARTED",
            GlobalStatus::Stopping => "STOPPING",
            GlobalStatus::Swapping => "SWAPPING",
        })
    }
}

impl fmt::Display for UpdatingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdatingStatus::Idle => "IDLE",
            UpdatingStatus::Updating => "UPDATING",
        })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Configuring => "CONFIGURING",
            Stage::Starting => "STARTING",
            Stage::Stopping => "STOPPING",
            Stage::Updating => "UPDATING",
            Stage::Swapping => "SWAPPING",
        })
    }
}

/// Snapshot of the three axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub configuration: ConfigurationStatus,
    pub global: GlobalStatus,
    pub updating: UpdatingStatus,
}
