//! Last-write-wins reconciliation and duplicate report detection
//!
//! Duplicate score for two reports is the weighted sum of:
//! - category exact match (0.3)
//! - proximity, linear from 0.4 at 0 m down to 0 at the radius (0.4)
//! - normalized Levenshtein similarity of `title + description` (0.3)

use civicsync_domain::constants::{
    CATEGORY_WEIGHT, DUPLICATE_RADIUS_METERS, DUPLICATE_SCORE_THRESHOLD, PROXIMITY_WEIGHT,
    TEXT_WEIGHT,
};
use civicsync_domain::{EntityRecord, EntityType};

use super::similarity::{haversine_meters, normalized_similarity};

/// Which copy survives a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    LocalWins,
    ServerWins,
}

/// Best existing report matching a candidate
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    pub existing: EntityRecord,
    pub score: f64,
}

/// Stateless conflict resolver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConflictResolver {
    threshold: f64,
    radius_meters: f64,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self { threshold: DUPLICATE_SCORE_THRESHOLD, radius_meters: DUPLICATE_RADIUS_METERS }
    }
}

impl ConflictResolver {
    pub fn new(threshold: f64, radius_meters: f64) -> Self {
        Self { threshold, radius_meters }
    }

    /// Later `modified_at` wins; ties and unknown local timestamps go to the server
    pub fn resolve_last_write_wins(&self, local: &EntityRecord, server: &EntityRecord) -> Resolution {
        match (local.modified_at, server.modified_at) {
            (Some(local_at), Some(server_at)) if local_at > server_at => Resolution::LocalWins,
            (Some(_), None) => Resolution::LocalWins,
            _ => Resolution::ServerWins,
        }
    }

    /// Weighted similarity of two reports in `[0, 1]`
    pub fn score_duplicate(&self, candidate: &EntityRecord, existing: &EntityRecord) -> f64 {
        let a = candidate.report_fields();
        let b = existing.report_fields();

        let category = match (&a.category, &b.category) {
            (Some(x), Some(y)) if x == y => CATEGORY_WEIGHT,
            _ => 0.0,
        };

        let proximity = match (a.location, b.location) {
            (Some(x), Some(y)) if self.radius_meters > 0.0 => {
                let distance = haversine_meters(x, y);
                PROXIMITY_WEIGHT * (1.0 - distance / self.radius_meters).max(0.0)
            }
            _ => 0.0,
        };

        let text = TEXT_WEIGHT * normalized_similarity(&a.normalized_text(), &b.normalized_text());

        category + proximity + text
    }

    /// Highest scoring existing report at or above the threshold
    ///
    /// Only reports take part; any other candidate type yields `None`.
    pub fn find_duplicate(
        &self,
        candidate: &EntityRecord,
        existing: &[EntityRecord],
    ) -> Option<DuplicateMatch> {
        if candidate.entity_type != EntityType::Report {
            return None;
        }

        existing
            .iter()
            .filter(|record| record.entity_type == EntityType::Report)
            .map(|record| DuplicateMatch {
                score: self.score_duplicate(candidate, record),
                existing: record.clone(),
            })
            .filter(|m| m.score >= self.threshold)
            .max_by(|x, y| x.score.total_cmp(&y.score))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{json, Value};

    use super::*;

    // One meter of latitude in degrees
    const METER: f64 = 1.0 / 111_195.0;

    fn report(id: &str, data: Value) -> EntityRecord {
        EntityRecord { id: id.into(), entity_type: EntityType::Report, modified_at: None, data }
    }

    fn pothole(id: &str, lat_offset_m: f64, title: &str) -> EntityRecord {
        report(
            id,
            json!({
                "category": "roads",
                "latitude": 51.5 + lat_offset_m * METER,
                "longitude": -0.12,
                "title": title,
                "description": ""
            }),
        )
    }

    #[test]
    fn server_newer_wins() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut local = report("l", json!({}));
        let mut server = report("s", json!({}));
        local.modified_at = Some(t);
        server.modified_at = Some(t + Duration::seconds(1));

        let resolver = ConflictResolver::default();
        assert_eq!(resolver.resolve_last_write_wins(&local, &server), Resolution::ServerWins);

        local.modified_at = Some(t + Duration::seconds(2));
        assert_eq!(resolver.resolve_last_write_wins(&local, &server), Resolution::LocalWins);
    }

    #[test]
    fn ties_go_to_server() {
        let t = Utc::now();
        let mut local = report("l", json!({}));
        let mut server = report("s", json!({}));
        local.modified_at = Some(t);
        server.modified_at = Some(t);
        assert_eq!(
            ConflictResolver::default().resolve_last_write_wins(&local, &server),
            Resolution::ServerWins
        );
    }

    #[test]
    fn nearby_similar_report_is_duplicate() {
        let resolver = ConflictResolver::default();
        let candidate = pothole("local", 0.0, "pothole a1");
        let existing = pothole("srv-1", 30.0, "pothole b1");

        let score = resolver.score_duplicate(&candidate, &existing);
        assert!((score - 0.85).abs() < 0.01, "score {score}");

        let found = resolver.find_duplicate(&candidate, &[existing]).unwrap();
        assert_eq!(found.existing.id, "srv-1");
    }

    #[test]
    fn distant_identical_report_is_not_duplicate() {
        let resolver = ConflictResolver::default();
        let candidate = pothole("local", 0.0, "pothole on main street");
        let existing = pothole("srv-1", 500.0, "pothole on main street");

        let score = resolver.score_duplicate(&candidate, &existing);
        assert!((score - 0.6).abs() < 1e-9, "score {score}");
        assert!(resolver.find_duplicate(&candidate, &[existing]).is_none());
    }

    #[test]
    fn best_match_wins() {
        let resolver = ConflictResolver::default();
        let candidate = pothole("local", 0.0, "pothole a1");
        let near = pothole("near", 5.0, "pothole a1");
        let far = pothole("far", 40.0, "pothole a1");

        let found = resolver.find_duplicate(&candidate, &[far, near]).unwrap();
        assert_eq!(found.existing.id, "near");
    }

    #[test]
    fn only_reports_are_deduplicated() {
        let resolver = ConflictResolver::default();
        let mut task = pothole("task", 0.0, "pothole a1");
        task.entity_type = EntityType::Task;
        let existing = pothole("srv", 0.0, "pothole a1");

        assert!(resolver.find_duplicate(&task, &[existing.clone()]).is_none());
        assert!(resolver.find_duplicate(&pothole("l", 0.0, "pothole a1"), &[task]).is_none());
    }

    #[test]
    fn missing_location_scores_no_proximity() {
        let resolver = ConflictResolver::default();
        let a = report("a", json!({ "category": "roads", "title": "x" }));
        let b = report("b", json!({ "category": "roads", "title": "x" }));
        assert!((resolver.score_duplicate(&a, &b) - 0.6).abs() < 1e-9);
    }
}
