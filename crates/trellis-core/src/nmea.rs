//! NMEA 0183 GGA parsing.
//!
//! The shears only ever commits GGA ("Global Positioning System Fix Data")
//! sentences. Both the `$GPGGA` and `$GNGGA` talker variants are accepted by
//! the one parser; everything else is rejected as the wrong sentence.
//!
//! Fields are positional. Coordinates arrive as ddmm.mmmm / dddmm.mmmm
//! magnitudes with a separate hemisphere letter and are converted to signed
//! decimal degrees here.

/// One parsed GGA fix, ready to be committed as a CSV row.
#[derive(Debug, Clone, PartialEq)]
pub struct GgaFix {
    /// Raw UTC time-of-day string, e.g. `192928.00`. Kept verbatim.
    pub utc_time: String,
    /// Latitude, decimal degrees. Negative south.
    pub latitude: f64,
    /// Longitude, decimal degrees. Negative west.
    pub longitude: f64,
    /// Fix quality indicator (0 = none, 1 = GPS, 2 = DGPS, ...).
    pub fix_quality: u8,
    /// Number of satellites in use.
    pub num_satellites: u8,
    /// Horizontal dilution of precision.
    pub hdop: f64,
    /// Antenna altitude above mean sea level, meters.
    pub altitude: f64,
    /// Geoid separation, meters.
    pub geoid_height: f64,
}

/// Convert an NMEA ddmm.mmmm (or dddmm.mmmm) magnitude to decimal degrees.
///
/// `degrees = floor(value / 100)`, `minutes = value − 100·degrees`,
/// `decimal = degrees + minutes / 60`. The caller applies hemisphere sign.
pub fn ddmm_to_degrees(value: f64) -> f64 {
    let degrees = (value / 100.0).floor();
    let minutes = value - 100.0 * degrees;
    degrees + minutes / 60.0
}

/// Parse one complete GGA sentence.
///
/// The sentence must carry at least 12 comma-separated fields; shorter
/// input is malformed and rejected without touching the log.
pub fn parse_gga(line: &str) -> Result<GgaFix, NmeaError> {
    let line = line.trim_end_matches(['\r', '\n']);
    // Everything after the checksum separator is not field data.
    let body = line.split('*').next().unwrap_or(line);
    let fields: Vec<&str> = body.split(',').collect();

    match fields[0] {
        "$GPGGA" | "$GNGGA" => {}
        other => return Err(NmeaError::WrongSentence(other.to_string())),
    }
    if fields.len() < 12 {
        return Err(NmeaError::TooFewFields { got: fields.len() });
    }

    let lat_raw: f64 = parse_num(fields[2], "latitude")?;
    let lat_sign = hemisphere_sign(fields[3], 'N', 'S')?;
    let lon_raw: f64 = parse_num(fields[4], "longitude")?;
    let lon_sign = hemisphere_sign(fields[5], 'E', 'W')?;

    Ok(GgaFix {
        utc_time: fields[1].to_string(),
        latitude: lat_sign * ddmm_to_degrees(lat_raw),
        longitude: lon_sign * ddmm_to_degrees(lon_raw),
        fix_quality: parse_num(fields[6], "fix quality")?,
        num_satellites: parse_num(fields[7], "satellite count")?,
        hdop: parse_num(fields[8], "hdop")?,
        altitude: parse_num(fields[9], "altitude")?,
        geoid_height: parse_num(fields[11], "geoid separation")?,
    })
}

fn parse_num<T: std::str::FromStr>(field: &str, name: &'static str) -> Result<T, NmeaError> {
    field
        .trim()
        .parse()
        .map_err(|_| NmeaError::BadNumber { field: name })
}

fn hemisphere_sign(field: &str, positive: char, negative: char) -> Result<f64, NmeaError> {
    let mut chars = field.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c == positive => Ok(1.0),
        (Some(c), None) if c == negative => Ok(-1.0),
        _ => Err(NmeaError::BadHemisphere(field.to_string())),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Reasons a sentence is dropped without committing a row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NmeaError {
    #[error("not a GGA sentence: {0}")]
    WrongSentence(String),

    #[error("malformed GGA sentence: {got} fields")]
    TooFewFields { got: usize },

    #[error("unparseable {field} field")]
    BadNumber { field: &'static str },

    #[error("bad hemisphere indicator: {0:?}")]
    BadHemisphere(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
