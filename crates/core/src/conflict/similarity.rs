//! Distance and text similarity helpers for duplicate scoring

use civicsync_domain::constants::EARTH_RADIUS_METERS;
use civicsync_domain::GeoPoint;

/// Great-circle distance in meters
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Edit distance over chars
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// `1 - distance / longest length`, in `[0, 1]`
///
/// Two empty strings are identical.
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint { latitude, longitude }
    }

    #[test]
    fn haversine_zero_for_same_point() {
        assert_eq!(haversine_meters(point(40.0, -73.0), point(40.0, -73.0)), 0.0);
    }

    #[test]
    fn haversine_one_degree_latitude() {
        let meters = haversine_meters(point(0.0, 0.0), point(1.0, 0.0));
        assert!((meters - 111_195.0).abs() < 10.0, "got {meters}");
    }

    #[test]
    fn levenshtein_classic_cases() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(normalized_similarity("", ""), 1.0);
        assert_eq!(normalized_similarity("abc", "xyz"), 0.0);
        assert!((normalized_similarity("pothole a1", "pothole b1") - 0.9).abs() < 1e-9);
    }
}
