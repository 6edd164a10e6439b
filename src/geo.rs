//! Packed geographic locations.
//!
//! Samples carry an optional location packed into a single `u64`: latitude in
//! the high 32 bits, longitude in the low 32 bits, each stored as fixed-point
//! offsets from the south pole / antimeridian. Resolution is about 4e-8
//! degrees of latitude, far below sensor accuracy.

const LAT_SPAN: f64 = 180.0;
const LON_SPAN: f64 = 360.0;
const SCALE: f64 = (1u64 << 32) as f64;

/// Pack a latitude/longitude pair into a 64-bit location.
///
/// Latitude is clamped to [-90, 90] and longitude to [-180, 180].
pub fn pack(lat: f64, lon: f64) -> u64 {
    let lat = lat.clamp(-90.0, 90.0);
    let lon = lon.clamp(-180.0, 180.0);
    let lat_bits = (((lat + 90.0) / LAT_SPAN) * (SCALE - 1.0)).round() as u64;
    let lon_bits = (((lon + 180.0) / LON_SPAN) * (SCALE - 1.0)).round() as u64;
    (lat_bits << 32) | lon_bits
}

/// Unpack a 64-bit location into a `(latitude, longitude)` pair.
pub fn unpack(location: u64) -> (f64, f64) {
    let lat_bits = (location >> 32) as f64;
    let lon_bits = (location & 0xFFFF_FFFF) as f64;
    let lat = lat_bits / (SCALE - 1.0) * LAT_SPAN - 90.0;
    let lon = lon_bits / (SCALE - 1.0) * LON_SPAN - 180.0;
    (lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_round_trip() {
        let cases = [
            (48.0, -4.5),
            (0.0, 0.0),
            (-33.8688, 151.2093),
            (89.9999, -179.9999),
        ];
        for (lat, lon) in cases {
            let (got_lat, got_lon) = unpack(pack(lat, lon));
            assert!((got_lat - lat).abs() < 1e-6, "lat {} -> {}", lat, got_lat);
            assert!((got_lon - lon).abs() < 1e-6, "lon {} -> {}", lon, got_lon);
        }
    }

    #[test]
    fn test_pack_clamps_out_of_range() {
        let (lat, lon) = unpack(pack(95.0, 200.0));
        assert!((lat - 90.0).abs() < 1e-6);
        assert!((lon - 180.0).abs() < 1e-6);
    }

    #[test]
    fn test_poles() {
        let (lat, _) = unpack(pack(-90.0, 0.0));
        assert!((lat + 90.0).abs() < 1e-6);
        let (lat, _) = unpack(pack(90.0, 0.0));
        assert!((lat - 90.0).abs() < 1e-6);
    }
}
