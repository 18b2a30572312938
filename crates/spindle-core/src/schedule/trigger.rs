//! Calendar trigger: `"<minute> <hour> <day_of_week>"`.
//!
//! Each field accepts `*`, `*/n`, `a`, `a-b`, `a-b/n` and comma lists.
//! Day-of-week is `0..6` with 0 = Monday, or `mon..sun`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Timelike};

const DAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("expected 3 fields (minute hour day_of_week), got {0}")]
    FieldCount(usize),

    #[error("invalid {field} value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid {field} step in '{value}'")]
    InvalidStep { field: &'static str, value: String },
}

#[derive(Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: Option<&'static [&'static str]>,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: None,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: None,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day_of_week",
    min: 0,
    max: 6,
    names: Some(&DAY_NAMES),
};

impl FieldSpec {
    fn value(&self, raw: &str) -> Result<u32, TriggerError> {
        let lower = raw.to_ascii_lowercase();
        let value = match self.names.and_then(|names| names.iter().position(|n| *n == lower)) {
            Some(index) => index as u32,
            None => raw.parse().map_err(|_| TriggerError::InvalidValue {
                field: self.name,
                value: raw.to_string(),
            })?,
        };
        if value < self.min || value > self.max {
            return Err(TriggerError::OutOfRange {
                field: self.name,
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(value)
    }

    /// Parse one field into a bitmask of allowed values.
    fn parse(&self, field: &str) -> Result<u64, TriggerError> {
        let mut mask = 0u64;
        for part in field.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().map_err(|_| TriggerError::InvalidStep {
                        field: self.name,
                        value: part.to_string(),
                    })?;
                    if step == 0 {
                        return Err(TriggerError::InvalidStep {
                            field: self.name,
                            value: part.to_string(),
                        });
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range == "*" {
                (self.min, self.max)
            } else if let Some((a, b)) = range.split_once('-') {
                (self.value(a)?, self.value(b)?)
            } else {
                let v = self.value(range)?;
                // `a/n` is not a thing; only ranges take a step
                if step != 1 {
                    return Err(TriggerError::InvalidStep {
                        field: self.name,
                        value: part.to_string(),
                    });
                }
                (v, v)
            };
            if start > end {
                return Err(TriggerError::InvalidValue {
                    field: self.name,
                    value: part.to_string(),
                });
            }

            let mut v = start;
            while v <= end {
                mask |= 1 << v;
                v += step;
            }
        }
        Ok(mask)
    }
}

/// Minute-resolution calendar trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarTrigger {
    expr: String,
    minutes: u64,
    hours: u64,
    days_of_week: u64,
}

impl CalendarTrigger {
    pub fn parse(expr: &str) -> Result<Self, TriggerError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dow] = fields.as_slice() else {
            return Err(TriggerError::FieldCount(fields.len()));
        };
        Ok(Self {
            expr: fields.join(" "),
            minutes: MINUTE.parse(minute)?,
            hours: HOUR.parse(hour)?,
            days_of_week: DAY_OF_WEEK.parse(dow)?,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Does the minute containing `local` fire?
    pub fn matches<Tz: TimeZone>(&self, local: &DateTime<Tz>) -> bool {
        let dow = local.weekday().num_days_from_monday();
        self.minutes & (1 << local.minute()) != 0
            && self.hours & (1 << local.hour()) != 0
            && self.days_of_week & (1 << dow) != 0
    }
}

impl FromStr for CalendarTrigger {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CalendarTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}
