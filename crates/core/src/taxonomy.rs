//! Dimensions and Metrics
//!
//! The closed vocabulary used to segment ad-performance records and to name
//! the ratio a hypothesis is tested on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A categorical column records can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    CreativeType,
    AudienceType,
    Platform,
    Country,
}

impl Dimension {
    /// Every dimension, in exploration order.
    pub const ALL: [Dimension; 4] = [
        Dimension::CreativeType,
        Dimension::AudienceType,
        Dimension::Platform,
        Dimension::Country,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::CreativeType => "creative_type",
            Dimension::AudienceType => "audience_type",
            Dimension::Platform => "platform",
            Dimension::Country => "country",
        }
    }

    /// Words that, when present in a free-text question, point at this dimension.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Dimension::CreativeType => &["creative", "image", "video", "carousel", "format"],
            Dimension::AudienceType => &["audience", "lookalike", "retarget", "broad", "interest"],
            Dimension::Platform => &["platform", "facebook", "instagram", "placement"],
            Dimension::Country => &["country", "countries", "geo", "region", "market"],
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "creative_type" | "creative" => Ok(Dimension::CreativeType),
            "audience_type" | "audience" => Ok(Dimension::AudienceType),
            "platform" => Ok(Dimension::Platform),
            "country" | "geo" => Ok(Dimension::Country),
            other => Err(CoreError::parse(format!("unknown dimension '{}'", other))),
        }
    }
}

/// A ratio metric a hypothesis can be tested on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Roas,
    Ctr,
    Cpc,
    ConversionRate,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Metric::Roas, Metric::Ctr, Metric::Cpc, Metric::ConversionRate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Roas => "roas",
            Metric::Ctr => "ctr",
            Metric::Cpc => "cpc",
            Metric::ConversionRate => "conversion_rate",
        }
    }

    /// CPC is a cost: a smaller value is the better outcome.
    pub fn lower_is_better(&self) -> bool {
        matches!(self, Metric::Cpc)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Metric {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "roas" => Ok(Metric::Roas),
            "ctr" => Ok(Metric::Ctr),
            "cpc" => Ok(Metric::Cpc),
            "conversion_rate" | "cvr" => Ok(Metric::ConversionRate),
            other => Err(CoreError::parse(format!("unknown metric '{}'", other))),
        }
    }
}
