/// Arcseconds per radian.
pub const ARCSEC_PER_RAD: f64 = 180.0 * 3600.0 / std::f64::consts::PI;

/// Convert (RA, Dec) in radians to a unit vector `[x, y, z]`.
pub fn radec_to_xyz(ra: f64, dec: f64) -> [f64; 3] {
    let cos_dec = dec.cos();
    [cos_dec * ra.cos(), cos_dec * ra.sin(), dec.sin()]
}

/// Convert (RA, Dec) in degrees to a unit vector.
pub fn radec_deg_to_xyz(ra_deg: f64, dec_deg: f64) -> [f64; 3] {
    radec_to_xyz(ra_deg.to_radians(), dec_deg.to_radians())
}

/// Great-circle angular distance between two unit vectors, in radians.
///
/// Uses the chord/half-angle form, which stays accurate for the sub-arcsecond
/// separations a crossmatch cares about (`acos` of the dot product loses
/// almost all precision there).
pub fn angular_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    let chord = (dx * dx + dy * dy + dz * dz).sqrt();
    2.0 * (0.5 * chord).clamp(0.0, 1.0).asin()
}

pub fn arcsec_to_rad(arcsec: f64) -> f64 {
    arcsec / ARCSEC_PER_RAD
}

pub fn rad_to_arcsec(rad: f64) -> f64 {
    rad * ARCSEC_PER_RAD
}
