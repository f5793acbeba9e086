const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// A "within `max_km` of here" filter. Only applies when all three parts are given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Radius {
    pub latitude: f64,
    pub longitude: f64,
    pub max_km: f64,
}

impl Radius {
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>, max_km: Option<f64>) -> Option<Self> {
        Some(Self {
            latitude: latitude?,
            longitude: longitude?,
            max_km: max_km?,
        })
    }

    /// Rows without coordinates never match.
    pub fn contains(&self, latitude: Option<f64>, longitude: Option<f64>) -> bool {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => distance_km(self.latitude, self.longitude, lat, lon) <= self.max_km,
            _ => false,
        }
    }
}
