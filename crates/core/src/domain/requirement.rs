use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Smallest budget (in whole currency units) the catalog can serve.
pub const MIN_BUDGET: u64 = 25_000;

/// Ordinal importance/capability level, totally ordered `Low < Medium < High`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Low, Level::Medium, Level::High];

    pub fn ordinal(self) -> i8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("`{0}` is not one of low|medium|high")]
pub struct LevelParseError(pub String);

impl FromStr for Level {
    type Err = LevelParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(LevelParseError(value.to_string())),
        }
    }
}

/// The five non-budget attributes shared by requirement and feature profiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    GpuIntensity,
    DisplayQuality,
    Portability,
    Multitasking,
    ProcessingSpeed,
}

impl Attribute {
    pub const ALL: [Attribute; 5] = [
        Attribute::GpuIntensity,
        Attribute::DisplayQuality,
        Attribute::Portability,
        Attribute::Multitasking,
        Attribute::ProcessingSpeed,
    ];

    /// Field name used in oracle records and the extraction schema.
    pub fn record_key(self) -> &'static str {
        match self {
            Self::GpuIntensity => "GPU intensity",
            Self::DisplayQuality => "Display quality",
            Self::Portability => "Portability",
            Self::Multitasking => "Multitasking",
            Self::ProcessingSpeed => "Processing speed",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::GpuIntensity => "GPU intensity",
            Self::DisplayQuality => "display quality",
            Self::Portability => "portability",
            Self::Multitasking => "multitasking",
            Self::ProcessingSpeed => "processing speed",
        }
    }
}

pub const BUDGET_KEY: &str = "Budget";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InvalidReason {
    NotALevel { value: String },
    NotAnInteger { value: String },
    BelowMinimum { value: i64, minimum: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidField {
    pub field: String,
    #[serde(flatten)]
    pub reason: InvalidReason,
}

#[derive(Clone, Debug, Default, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("requirement record failed validation (missing: {missing_fields:?}, invalid: {invalid_fields:?})")]
pub struct ValidationError {
    pub missing_fields: Vec<String>,
    pub invalid_fields: Vec<InvalidField>,
}

impl ValidationError {
    pub fn is_empty(&self) -> bool {
        self.missing_fields.is_empty() && self.invalid_fields.is_empty()
    }

    /// The budget that was rejected for being under [`MIN_BUDGET`], if any.
    pub fn budget_below_minimum(&self) -> Option<i64> {
        self.invalid_fields.iter().find_map(|invalid| match invalid.reason {
            InvalidReason::BelowMinimum { value, .. } if invalid.field == BUDGET_KEY => Some(value),
            _ => None,
        })
    }
}

/// A complete, validated set of user requirements. Only constructible through
/// validation, so holding one means all six fields are present and in range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementProfile {
    gpu_intensity: Level,
    display_quality: Level,
    portability: Level,
    multitasking: Level,
    processing_speed: Level,
    budget: u64,
}

impl RequirementProfile {
    pub fn new(levels: [Level; 5], budget: u64) -> Result<Self, ValidationError> {
        if budget < MIN_BUDGET {
            return Err(ValidationError {
                missing_fields: Vec::new(),
                invalid_fields: vec![InvalidField {
                    field: BUDGET_KEY.to_string(),
                    reason: InvalidReason::BelowMinimum {
                        value: i64::try_from(budget).unwrap_or(i64::MAX),
                        minimum: MIN_BUDGET,
                    },
                }],
            });
        }

        let [gpu_intensity, display_quality, portability, multitasking, processing_speed] = levels;
        Ok(Self { gpu_intensity, display_quality, portability, multitasking, processing_speed, budget })
    }

    /// Validates a structured extraction record. Never guesses: every problem is
    /// reported, and nothing is defaulted.
    pub fn from_record(record: &Map<String, Value>) -> Result<Self, ValidationError> {
        let mut error = ValidationError::default();
        let mut levels = [Level::Low; 5];

        for (slot, attribute) in levels.iter_mut().zip(Attribute::ALL) {
            let key = attribute.record_key();
            match record.get(key) {
                None | Some(Value::Null) => error.missing_fields.push(key.to_string()),
                Some(Value::String(raw)) => match raw.parse::<Level>() {
                    Ok(level) => *slot = level,
                    Err(_) => error.invalid_fields.push(InvalidField {
                        field: key.to_string(),
                        reason: InvalidReason::NotALevel { value: raw.clone() },
                    }),
                },
                Some(other) => error.invalid_fields.push(InvalidField {
                    field: key.to_string(),
                    reason: InvalidReason::NotALevel { value: other.to_string() },
                }),
            }
        }

        let budget = match record.get(BUDGET_KEY) {
            None | Some(Value::Null) => {
                error.missing_fields.push(BUDGET_KEY.to_string());
                None
            }
            Some(value) => match budget_value(value) {
                Some(budget) if budget >= 0 && budget.unsigned_abs() >= MIN_BUDGET => {
                    Some(budget.unsigned_abs())
                }
                Some(budget) => {
                    error.invalid_fields.push(InvalidField {
                        field: BUDGET_KEY.to_string(),
                        reason: InvalidReason::BelowMinimum { value: budget, minimum: MIN_BUDGET },
                    });
                    None
                }
                None => {
                    error.invalid_fields.push(InvalidField {
                        field: BUDGET_KEY.to_string(),
                        reason: InvalidReason::NotAnInteger { value: value.to_string() },
                    });
                    None
                }
            },
        };

        match budget {
            Some(budget) if error.is_empty() => Self::new(levels, budget),
            _ => Err(error),
        }
    }

    pub fn level(&self, attribute: Attribute) -> Level {
        match attribute {
            Attribute::GpuIntensity => self.gpu_intensity,
            Attribute::DisplayQuality => self.display_quality,
            Attribute::Portability => self.portability,
            Attribute::Multitasking => self.multitasking,
            Attribute::ProcessingSpeed => self.processing_speed,
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Single-line summary in the shape the recommendation context expects.
    pub fn summary(&self) -> String {
        let levels = Attribute::ALL
            .iter()
            .map(|attribute| format!("{} {}", self.level(*attribute), attribute.label()))
            .collect::<Vec<_>>();
        format!(
            "I need a laptop with {} and a budget of {}.",
            levels.join(", "),
            self.budget
        )
    }
}

fn budget_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|float| float.fract() == 0.0).map(|float| float as i64)),
        Value::String(raw) => {
            let digits = raw.trim().replace([',', '_', ' '], "");
            digits.parse::<i64>().ok()
        }
        _ => None,
    }
}
