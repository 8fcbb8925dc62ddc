use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grouping level the OCR service assigned to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DetectionKind {
    Line,
    Word,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDetection {
    pub text: String,
    pub kind: DetectionKind,
}

#[cfg(test)]
impl TextDetection {
    pub fn line(text: &str) -> Self {
        TextDetection {
            text: text.to_string(),
            kind: DetectionKind::Line,
        }
    }

    pub fn word(text: &str) -> Self {
        TextDetection {
            text: text.to_string(),
            kind: DetectionKind::Word,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub make: String,
    pub model: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitRecord {
    pub plate: String,
    pub owner: String,
    pub vehicle: Vehicle,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub spot: i64,
}

impl PermitRecord {
    /// True when `now` lies inside the validity window, both ends included.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_to
    }
}

/// Response body shared by `detect-plate` and `lookup-plate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub plate: Option<String>,
    pub is_authorized: bool,
    pub permit: Option<PermitRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn permit(from: DateTime<Utc>, to: DateTime<Utc>) -> PermitRecord {
        PermitRecord {
            plate: "GMP 929".to_string(),
            owner: "Dana Ruiz".to_string(),
            vehicle: Vehicle {
                make: "Honda".to_string(),
                model: "Civic".to_string(),
                color: "Blue".to_string(),
            },
            valid_from: from,
            valid_to: to,
            spot: 12,
        }
    }

    #[test]
    fn active_window_is_inclusive_at_both_ends() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let p = permit(t0, t1);
        let ms = Duration::milliseconds(1);

        assert!(p.is_active(t0));
        assert!(p.is_active(t1));
        assert!(!p.is_active(t0 - ms));
        assert!(!p.is_active(t1 + ms));
    }

    #[test]
    fn permit_uses_camel_case_on_the_wire() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let value = serde_json::to_value(permit(t0, t0)).unwrap();
        assert_eq!(value["validFrom"], json!("2025-01-01T00:00:00Z"));
        assert_eq!(value["vehicle"]["make"], json!("Honda"));
        assert_eq!(value["spot"], json!(12));
    }

    #[test]
    fn result_serializes_missing_plate_as_null() {
        let result = DetectionResult {
            plate: None,
            is_authorized: false,
            permit: None,
        };
        assert_eq!(
            serde_json::to_value(result).unwrap(),
            json!({"plate": null, "isAuthorized": false, "permit": null})
        );
    }

    #[test]
    fn detection_kind_matches_provider_spelling() {
        let kind: DetectionKind = serde_json::from_value(json!("LINE")).unwrap();
        assert_eq!(kind, DetectionKind::Line);
    }
}
