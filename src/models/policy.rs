//! Retention policies and their per-tier schedules

use std::collections::BTreeMap;

use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BackhaulError, Result};

/// Independent retention track
///
/// Each tier keeps its own schedule and keep-count; due-ness is evaluated
/// per tier and one execution is tagged with exactly one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Hourly,
        Tier::Daily,
        Tier::Weekly,
        Tier::Monthly,
        Tier::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(BackhaulError::Config(format!("Unknown tier: {}", other))),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Schedule parameters for one tier
///
/// Weekdays are numbered 0-6 starting at Monday. Day-of-month is limited to
/// 1-28 so every configured day exists in every month; the clock additionally
/// clamps to the month's last day at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TierSchedule {
    /// Every `interval` hours since the last successful run (1-12)
    EveryHours { interval: u32 },
    /// Once per calendar day at the given UTC time
    DailyAt { at: NaiveTime },
    /// Once per week on the given weekday at the given UTC time
    WeeklyAt { at: NaiveTime, weekday: u8 },
    /// Once per month on the given day at the given UTC time
    MonthlyAt { at: NaiveTime, day: u32 },
    /// Once per year in the given month on the given day at the given UTC time
    YearlyAt { at: NaiveTime, day: u32, month: u32 },
}

impl TierSchedule {
    /// The tier this schedule shape belongs to
    pub fn tier(&self) -> Tier {
        match self {
            Self::EveryHours { .. } => Tier::Hourly,
            Self::DailyAt { .. } => Tier::Daily,
            Self::WeeklyAt { .. } => Tier::Weekly,
            Self::MonthlyAt { .. } => Tier::Monthly,
            Self::YearlyAt { .. } => Tier::Yearly,
        }
    }
}

/// Configuration of a single retention tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Whether the scheduler evaluates this tier
    pub enabled: bool,

    /// How many completed artifacts to retain (0 disables the tier in effect)
    pub keep_count: u32,

    /// When the tier comes due
    pub schedule: TierSchedule,
}

impl TierConfig {
    pub fn new(keep_count: u32, schedule: TierSchedule) -> Self {
        Self {
            enabled: true,
            keep_count,
            schedule,
        }
    }

    /// Whether the scheduler should consider this tier at all
    pub fn is_active(&self) -> bool {
        self.enabled && self.keep_count > 0
    }

    /// Validate schedule parameters and that the schedule shape matches `tier`
    pub fn validate(&self, tier: Tier) -> Result<()> {
        if self.schedule.tier() != tier {
            return Err(BackhaulError::Config(format!(
                "Schedule kind {} does not match tier {}",
                self.schedule.tier(),
                tier
            )));
        }
        match self.schedule {
            TierSchedule::EveryHours { interval } => {
                if !(1..=12).contains(&interval) {
                    return Err(BackhaulError::Config(format!(
                        "Hourly interval must be 1-12, got {}",
                        interval
                    )));
                }
            }
            TierSchedule::DailyAt { .. } => {}
            TierSchedule::WeeklyAt { weekday, .. } => {
                if weekday > 6 {
                    return Err(BackhaulError::Config(format!(
                        "Weekday must be 0-6, got {}",
                        weekday
                    )));
                }
            }
            TierSchedule::MonthlyAt { day, .. } => {
                if !(1..=28).contains(&day) {
                    return Err(BackhaulError::Config(format!(
                        "Day of month must be 1-28, got {}",
                        day
                    )));
                }
            }
            TierSchedule::YearlyAt { day, month, .. } => {
                if !(1..=28).contains(&day) {
                    return Err(BackhaulError::Config(format!(
                        "Day of month must be 1-28, got {}",
                        day
                    )));
                }
                if !(1..=12).contains(&month) {
                    return Err(BackhaulError::Config(format!(
                        "Month must be 1-12, got {}",
                        month
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A named set of tier configurations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Unique policy identifier (UUID string)
    pub id: String,

    /// Display name
    pub name: String,

    /// Tier configurations keyed by tier
    pub tiers: BTreeMap<Tier, TierConfig>,

    /// Creation timestamp (unix millis)
    pub created_at: i64,
}

impl RetentionPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            tiers: BTreeMap::new(),
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_tier(mut self, tier: Tier, config: TierConfig) -> Self {
        self.tiers.insert(tier, config);
        self
    }

    /// Tiers the scheduler should evaluate (enabled with a positive keep count)
    pub fn active_tiers(&self) -> impl Iterator<Item = (Tier, &TierConfig)> {
        self.tiers
            .iter()
            .filter(|(_, cfg)| cfg.is_active())
            .map(|(tier, cfg)| (*tier, cfg))
    }

    /// Validate every configured tier
    pub fn validate(&self) -> Result<()> {
        for (tier, config) in &self.tiers {
            config.validate(*tier)?;
        }
        Ok(())
    }

    /// A daily-at-02:00 + weekly Sunday policy used by seeds and tests
    pub fn standard(name: impl Into<String>) -> Self {
        let two_am = NaiveTime::from_hms_opt(2, 0, 0).expect("valid time");
        Self::new(name)
            .with_tier(
                Tier::Daily,
                TierConfig::new(7, TierSchedule::DailyAt { at: two_am }),
            )
            .with_tier(
                Tier::Weekly,
                TierConfig::new(
                    4,
                    TierSchedule::WeeklyAt {
                        at: two_am,
                        weekday: 6,
                    },
                ),
            )
    }
}
