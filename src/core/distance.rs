use crate::domain::model::Coordinates;

pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Haversine 大圓距離（英里）
pub fn great_circle_miles(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_MILES * c
}

// 大圓往極區彎曲，東西向需要多留一點
const BOX_MARGIN: f64 = 1.02;

/// 粗略的經緯度邊界，用於半徑查詢前的預先過濾；寧可多收，最後以 haversine 篩選
pub fn bounding_box(center: Coordinates, radius_miles: f64) -> (Coordinates, Coordinates) {
    let lat_delta = (radius_miles / EARTH_RADIUS_MILES).to_degrees() * BOX_MARGIN;
    let cos_lat = center.latitude.to_radians().cos().abs().max(0.01);
    let lon_delta = lat_delta / cos_lat;
    (
        Coordinates::new(center.latitude - lat_delta, center.longitude - lon_delta),
        Coordinates::new(center.latitude + lat_delta, center.longitude + lon_delta),
    )
}

pub fn within_box(point: Coordinates, bounds: &(Coordinates, Coordinates)) -> bool {
    let (min, max) = bounds;
    point.latitude >= min.latitude
        && point.latitude <= max.latitude
        && point.longitude >= min.longitude
        && point.longitude <= max.longitude
}
