pub(crate) fn to_u16(a: u8, b: u8) -> u16 {
    ((a as u16) << 8) + (b as u16)
}

pub(crate) fn degree_to_radian(degree: f64) -> f64 {
    degree * std::f64::consts::PI / 180.
}

/// Angle in degrees from the second and third byte of a measurement frame.
/// The lowest bit of `bit1` is the check bit and carries no angle data.
pub(crate) fn to_angle(bit1: u8, bit2: u8) -> f64 {
    let a = ((bit1 as u16) >> 1) + ((bit2 as u16) << 7);
    (a as f64) / 64.
}

/// Distance in millimetres from the last two bytes of a measurement frame.
pub(crate) fn calc_distance(b1: u8, b2: u8) -> f64 {
    (to_u16(b2, b1) as f64) / 4.
}

pub(crate) fn to_string(data: &[u8]) -> String {
    data.iter()
        .map(|e| format!("{:02X}", e))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fixed-precision decimal without a sign on values that round to zero.
pub(crate) fn fixed(value: f64, decimals: usize) -> String {
    let half_ulp = 0.5 * 10f64.powi(-(decimals as i32));
    let value = if value.abs() < half_ulp { 0.0 } else { value };
    format!("{:.*}", decimals, value)
}
