//! Great-circle distance
//!
//! Haversine on a sphere of radius [`EARTH_RADIUS_KM`]. All listing distances
//! in the marketplace go through [`distance_km`].

use serde::{Deserialize, Serialize};

use crate::error::MarketError;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    #[inline]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite and inside [-90,90] / [-180,180].
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    pub fn validate(self) -> Result<Self, MarketError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(MarketError::InvalidCoordinate { lat: self.lat, lng: self.lng })
        }
    }

    /// Builds a coordinate from nullable DB columns. Both halves must be present.
    pub fn from_parts(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Some(Self::new(lat, lng)),
            _ => None,
        }
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self::new(lat, lng)
    }
}

/// Distance in kilometres between `a` and `b`.
///
/// Fails with [`MarketError::InvalidCoordinate`] instead of returning NaN or 0
/// for malformed input.
pub fn distance_km(a: Coordinate, b: Coordinate) -> Result<f64, MarketError> {
    let a = a.validate()?;
    let b = b.validate()?;

    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    // 丸め誤差で h が 1 をわずかに超えることがある
    let h = h.clamp(0.0, 1.0);

    Ok(2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRISSUR: Coordinate = Coordinate { lat: 10.52, lng: 76.21 };

    fn approx(actual: f64, expected: f64, tol: f64) -> bool {
        (actual - expected).abs() <= tol
    }

    #[test]
    fn thrissur_reference_distances() {
        let kochi = Coordinate::new(9.9312, 76.2673);
        let palakkad = Coordinate::new(10.7867, 76.6548);
        let kozhikode = Coordinate::new(11.2588, 75.7804);

        assert!(approx(distance_km(THRISSUR, kochi).unwrap(), 65.7711, 0.01));
        assert!(approx(distance_km(THRISSUR, palakkad).unwrap(), 56.9394, 0.01));
        assert!(approx(distance_km(THRISSUR, kozhikode).unwrap(), 94.6002, 0.01));
    }

    #[test]
    fn one_degree_of_longitude_on_equator() {
        let d = distance_km(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0)).unwrap();
        assert!(approx(d, 111.1949, 0.01));
    }

    #[test]
    fn same_point_is_zero() {
        assert_eq!(distance_km(THRISSUR, THRISSUR).unwrap(), 0.0);
        let pole = Coordinate::new(90.0, 180.0);
        assert_eq!(distance_km(pole, pole).unwrap(), 0.0);
    }

    #[test]
    fn symmetric() {
        let points = [
            THRISSUR,
            Coordinate::new(-33.8688, 151.2093),
            Coordinate::new(51.5074, -0.1278),
            Coordinate::new(0.0, 179.9),
            Coordinate::new(0.0, -179.9),
            Coordinate::new(-90.0, 0.0),
        ];
        for a in points {
            for b in points {
                let ab = distance_km(a, b).unwrap();
                let ba = distance_km(b, a).unwrap();
                assert!((ab - ba).abs() <= 1e-9 * ab.max(1.0), "{a:?} {b:?}");
                assert!(ab >= 0.0);
            }
        }
    }

    #[test]
    fn triangle_inequality() {
        let points = [
            THRISSUR,
            Coordinate::new(9.9312, 76.2673),
            Coordinate::new(28.6139, 77.2090),
            Coordinate::new(40.7128, -74.0060),
            Coordinate::new(-1.2921, 36.8219),
            Coordinate::new(89.0, -45.0),
        ];
        for a in points {
            for b in points {
                for c in points {
                    let ac = distance_km(a, c).unwrap();
                    let ab = distance_km(a, b).unwrap();
                    let bc = distance_km(b, c).unwrap();
                    assert!(ac <= ab + bc + 1e-6, "{a:?} {b:?} {c:?}");
                }
            }
        }
    }

    #[test]
    fn rejects_out_of_range_and_nan() {
        let bad = [
            Coordinate::new(90.5, 0.0),
            Coordinate::new(0.0, -180.01),
            Coordinate::new(f64::NAN, 76.0),
            Coordinate::new(10.0, f64::INFINITY),
        ];
        for c in bad {
            assert!(matches!(
                distance_km(THRISSUR, c),
                Err(MarketError::InvalidCoordinate { .. })
            ));
            assert!(distance_km(c, THRISSUR).is_err());
        }
    }

    #[test]
    fn from_parts_requires_both() {
        assert_eq!(Coordinate::from_parts(Some(1.0), Some(2.0)), Some(Coordinate::new(1.0, 2.0)));
        assert_eq!(Coordinate::from_parts(Some(1.0), None), None);
        assert_eq!(Coordinate::from_parts(None, None), None);
    }
}
