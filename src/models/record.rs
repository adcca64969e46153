//! Ad-Performance Records
//!
//! Raw rows as handed over by a reader, their typed form, and the record set a
//! run works on.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use insight_cascade_core::{Dimension, Metric};
use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

const DATE_FORMAT: &str = "%Y-%m-%d";
/// Largest accepted count cell; every count up to it is exact as an `f64`.
pub const MAX_COUNT: u64 = 1 << 53;

/// One untyped input row. Numeric columns are kept as text so that a bad
/// cell rejects only its row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAdRow {
    pub campaign_name: String,
    pub adset_name: String,
    pub date: String,
    pub spend: String,
    pub impressions: String,
    pub clicks: String,
    pub purchases: String,
    pub revenue: String,
    pub creative_type: String,
    pub audience_type: String,
    pub platform: String,
    pub country: String,
}

/// One typed row of ad performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdRecord {
    pub campaign_name: String,
    pub adset_name: String,
    pub date: NaiveDate,
    pub spend: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub purchases: u64,
    pub revenue: f64,
    pub creative_type: String,
    pub audience_type: String,
    pub platform: String,
    pub country: String,
}

impl AdRecord {
    /// Value of a categorical dimension for this row.
    pub fn segment(&self, dimension: Dimension) -> &str {
        match dimension {
            Dimension::CreativeType => &self.creative_type,
            Dimension::AudienceType => &self.audience_type,
            Dimension::Platform => &self.platform,
            Dimension::Country => &self.country,
        }
    }

    /// Per-row value of a ratio metric, `None` when its denominator is zero.
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        let (num, den) = match metric {
            Metric::Roas => (self.revenue, self.spend),
            Metric::Ctr => (self.clicks as f64, self.impressions as f64),
            Metric::Cpc => (self.spend, self.clicks as f64),
            Metric::ConversionRate => (self.purchases as f64, self.clicks as f64),
        };
        if den > 0.0 {
            Some(num / den)
        } else {
            None
        }
    }

    fn hash_into(&self, state: &mut impl Hasher) {
        self.campaign_name.hash(state);
        self.adset_name.hash(state);
        self.date.hash(state);
        self.spend.to_bits().hash(state);
        self.impressions.hash(state);
        self.clicks.hash(state);
        self.purchases.hash(state);
        self.revenue.to_bits().hash(state);
        self.creative_type.hash(state);
        self.audience_type.hash(state);
        self.platform.hash(state);
        self.country.hash(state);
    }
}

fn parse_amount(column: &str, raw: &str) -> AppResult<f64> {
    let value: f64 = raw.trim().parse().map_err(|_| {
        AppError::data_integrity(format!("{} is not numeric: '{}'", column, raw))
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::data_integrity(format!(
            "{} must be a finite non-negative number, got {}",
            column, raw
        )));
    }
    Ok(value)
}

fn parse_count(column: &str, raw: &str) -> AppResult<u64> {
    let value = match raw.trim().parse::<u64>() {
        Ok(n) => n,
        Err(_) => {
            let value = parse_amount(column, raw)?;
            if value.fract() != 0.0 {
                return Err(AppError::data_integrity(format!(
                    "{} must be a whole number, got {}",
                    column, raw
                )));
            }
            if value > MAX_COUNT as f64 {
                return Err(count_too_large(column, raw));
            }
            value as u64
        }
    };
    if value > MAX_COUNT {
        return Err(count_too_large(column, raw));
    }
    Ok(value)
}

fn count_too_large(column: &str, raw: &str) -> AppError {
    AppError::data_integrity(format!(
        "{} exceeds the largest accepted count {}, got {}",
        column, MAX_COUNT, raw
    ))
}

fn required_text(column: &str, raw: &str) -> AppResult<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(AppError::data_integrity(format!("{} is empty", column)));
    }
    Ok(value.to_string())
}

impl TryFrom<&RawAdRow> for AdRecord {
    type Error = AppError;

    fn try_from(row: &RawAdRow) -> AppResult<Self> {
        let date = NaiveDate::parse_from_str(row.date.trim(), DATE_FORMAT).map_err(|_| {
            AppError::data_integrity(format!("date is not YYYY-MM-DD: '{}'", row.date))
        })?;

        Ok(AdRecord {
            campaign_name: required_text("campaign_name", &row.campaign_name)?,
            adset_name: row.adset_name.trim().to_string(),
            date,
            spend: parse_amount("spend", &row.spend)?,
            impressions: parse_count("impressions", &row.impressions)?,
            clicks: parse_count("clicks", &row.clicks)?,
            purchases: parse_count("purchases", &row.purchases)?,
            revenue: parse_amount("revenue", &row.revenue)?,
            creative_type: required_text("creative_type", &row.creative_type)?,
            audience_type: required_text("audience_type", &row.audience_type)?,
            platform: required_text("platform", &row.platform)?,
            country: required_text("country", &row.country)?,
        })
    }
}

/// A row excluded during ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRow {
    /// Zero-based position in the input.
    pub row: usize,
    pub reason: String,
}

/// The immutable records of one run plus what was rejected on the way in.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    records: Vec<AdRecord>,
    rejected: Vec<RejectedRow>,
    fingerprint: u64,
}

impl RecordSet {
    /// Parse raw rows, keeping the good ones and recording the rest.
    pub fn from_rows(rows: &[RawAdRow]) -> Self {
        let mut records = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            match AdRecord::try_from(row) {
                Ok(record) => records.push(record),
                Err(e) => rejected.push(RejectedRow {
                    row: idx,
                    reason: e.to_string(),
                }),
            }
        }
        Self::assemble(records, rejected)
    }

    /// Wrap already-typed records.
    pub fn from_records(records: Vec<AdRecord>) -> Self {
        Self::assemble(records, Vec::new())
    }

    fn assemble(records: Vec<AdRecord>, rejected: Vec<RejectedRow>) -> Self {
        let mut hasher = DefaultHasher::new();
        records.len().hash(&mut hasher);
        for record in &records {
            record.hash_into(&mut hasher);
        }
        rejected.len().hash(&mut hasher);
        Self {
            records,
            rejected,
            fingerprint: hasher.finish(),
        }
    }

    pub fn records(&self) -> &[AdRecord] {
        &self.records
    }

    pub fn rejected(&self) -> &[RejectedRow] {
        &self.rejected
    }

    /// Rows seen on input, valid or not.
    pub fn total_rows(&self) -> usize {
        self.records.len() + self.rejected.len()
    }

    /// Content hash, equal for equal inputs.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn rejected_fraction(&self) -> f64 {
        match self.total_rows() {
            0 => 0.0,
            total => self.rejected.len() as f64 / total as f64,
        }
    }

    /// Fail when nothing usable is left or too many rows were rejected.
    pub fn check_integrity(&self, max_rejected_fraction: f64) -> AppResult<()> {
        if self.records.is_empty() {
            return Err(AppError::data_integrity(format!(
                "no usable records ({} rows rejected)",
                self.rejected.len()
            )));
        }
        let fraction = self.rejected_fraction();
        if fraction > max_rejected_fraction {
            return Err(AppError::data_integrity(format!(
                "{} of {} rows rejected ({:.1}%), above the {:.1}% ceiling",
                self.rejected.len(),
                self.total_rows(),
                fraction * 100.0,
                max_rejected_fraction * 100.0
            )));
        }
        Ok(())
    }
}
