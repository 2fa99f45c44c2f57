use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::requirement::{Attribute, Level};

/// Portability is `High` strictly below this weight (kg).
pub const PORTABILITY_HIGH_BELOW_KG: f64 = 1.51;
/// Portability is `Low` strictly above this weight (kg).
pub const PORTABILITY_LOW_ABOVE_KG: f64 = 2.51;

/// Ordinal capabilities derived from a catalog description. An attribute is
/// `None` when the classifier omitted it or answered outside the taxonomy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureProfile {
    pub gpu_intensity: Option<Level>,
    pub display_quality: Option<Level>,
    pub portability: Option<Level>,
    pub multitasking: Option<Level>,
    pub processing_speed: Option<Level>,
}

impl FeatureProfile {
    pub fn new(levels: [Level; 5]) -> Self {
        let [gpu_intensity, display_quality, portability, multitasking, processing_speed] = levels;
        Self {
            gpu_intensity: Some(gpu_intensity),
            display_quality: Some(display_quality),
            portability: Some(portability),
            multitasking: Some(multitasking),
            processing_speed: Some(processing_speed),
        }
    }

    /// Sentinel for entries the classifier could not handle; satisfies nothing.
    pub fn unclassified() -> Self {
        Self::default()
    }

    pub fn is_unclassified(&self) -> bool {
        Attribute::ALL.iter().all(|attribute| self.level(*attribute).is_none())
    }

    /// Lenient parse of a classifier record: unknown or malformed values become
    /// `None` rather than failing the whole entry.
    pub fn from_record(record: &Map<String, Value>) -> Self {
        let lookup = |attribute: Attribute| {
            record
                .get(attribute.record_key())
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse::<Level>().ok())
        };

        Self {
            gpu_intensity: lookup(Attribute::GpuIntensity),
            display_quality: lookup(Attribute::DisplayQuality),
            portability: lookup(Attribute::Portability),
            multitasking: lookup(Attribute::Multitasking),
            processing_speed: lookup(Attribute::ProcessingSpeed),
        }
    }

    pub fn level(&self, attribute: Attribute) -> Option<Level> {
        match attribute {
            Attribute::GpuIntensity => self.gpu_intensity,
            Attribute::DisplayQuality => self.display_quality,
            Attribute::Portability => self.portability,
            Attribute::Multitasking => self.multitasking,
            Attribute::ProcessingSpeed => self.processing_speed,
        }
    }

    /// True when every attribute of `self` is at least the matching attribute
    /// of `other` (absent counts as lowest).
    pub fn dominates(&self, other: &FeatureProfile) -> bool {
        Attribute::ALL.iter().all(|attribute| {
            let mine = self.level(*attribute).map(Level::ordinal).unwrap_or(-1);
            let theirs = other.level(*attribute).map(Level::ordinal).unwrap_or(-1);
            mine >= theirs
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyRule {
    pub attribute: Attribute,
    pub source: String,
    pub low: String,
    pub medium: String,
    pub high: String,
}

/// Fixed mapping from concrete technical attributes to ordinal levels, handed
/// to the classification oracle alongside every description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub rules: Vec<TaxonomyRule>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self {
            rules: vec![
                TaxonomyRule {
                    attribute: Attribute::GpuIntensity,
                    source: "type of the graphics processor".to_string(),
                    low: "entry-level, integrated graphics such as Intel UHD".to_string(),
                    medium: "mid-range such as Apple M1, AMD Radeon, Intel Iris".to_string(),
                    high: "high-end discrete such as Nvidia RTX".to_string(),
                },
                TaxonomyRule {
                    attribute: Attribute::DisplayQuality,
                    source: "display type, screen resolution, display size".to_string(),
                    low: "below Full HD (e.g. 1366x768)".to_string(),
                    medium: "Full HD (1920x1080) or higher".to_string(),
                    high: "4K, Retina or HDR support".to_string(),
                },
                TaxonomyRule {
                    attribute: Attribute::Portability,
                    source: "laptop weight".to_string(),
                    low: format!("heavier than {PORTABILITY_LOW_ABOVE_KG} kg"),
                    medium: format!(
                        "between {PORTABILITY_HIGH_BELOW_KG} kg and {PORTABILITY_LOW_ABOVE_KG} kg"
                    ),
                    high: format!("lighter than {PORTABILITY_HIGH_BELOW_KG} kg"),
                },
                TaxonomyRule {
                    attribute: Attribute::Multitasking,
                    source: "RAM size".to_string(),
                    low: "8GB or 12GB RAM".to_string(),
                    medium: "16GB RAM".to_string(),
                    high: "32GB or 64GB RAM".to_string(),
                },
                TaxonomyRule {
                    attribute: Attribute::ProcessingSpeed,
                    source: "CPU type, core count, clock speed".to_string(),
                    low: "Intel Core i3, AMD Ryzen 3".to_string(),
                    medium: "Intel Core i5, AMD Ryzen 5".to_string(),
                    high: "Intel Core i7 or better, AMD Ryzen 7 or better".to_string(),
                },
            ],
        }
    }
}

impl Taxonomy {
    /// Plain-text rendering used as classifier instructions.
    pub fn render(&self) -> String {
        self.rules
            .iter()
            .map(|rule| {
                format!(
                    "{} (from {}):\n- low: {}\n- medium: {}\n- high: {}",
                    rule.attribute.record_key(),
                    rule.source,
                    rule.low,
                    rule.medium,
                    rule.high
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{FeatureProfile, Taxonomy};
    use crate::domain::requirement::{Attribute, Level};

    #[test]
    fn record_parse_keeps_valid_levels_and_drops_invalid_ones() {
        let record = json!({
            "GPU intensity": "High",
            "Display quality": "ultra",
            "Portability": "low",
            "Processing speed": 2
        });
        let profile = FeatureProfile::from_record(record.as_object().expect("object"));

        assert_eq!(profile.level(Attribute::GpuIntensity), Some(Level::High));
        assert_eq!(profile.level(Attribute::DisplayQuality), None);
        assert_eq!(profile.level(Attribute::Portability), Some(Level::Low));
        assert_eq!(profile.level(Attribute::Multitasking), None);
        assert_eq!(profile.level(Attribute::ProcessingSpeed), None);
        assert!(!profile.is_unclassified());
    }

    #[test]
    fn unclassified_sentinel_is_dominated_by_everything() {
        let sentinel = FeatureProfile::unclassified();
        let weakest = FeatureProfile::new([Level::Low; 5]);

        assert!(sentinel.is_unclassified());
        assert!(weakest.dominates(&sentinel));
        assert!(!sentinel.dominates(&weakest));
    }

    #[test]
    fn taxonomy_render_names_every_attribute() {
        let rendered = Taxonomy::default().render();
        for attribute in Attribute::ALL {
            assert!(rendered.contains(attribute.record_key()));
        }
        assert!(rendered.contains("1.51 kg"));
    }
}
