//! # Polyline Codec
//!
//! Google Encoded Polyline Algorithm Format at 1e5 precision.
//!
//! Each coordinate is stored as a latitude delta followed by a longitude delta
//! from the previous coordinate. A delta is zig-zag encoded, split into 5-bit
//! groups (low bits first) with `0x20` as the continuation flag, and each group
//! is written as `chr(group + 63)`.
//!
//! Decoding never fails hard: [`decode`] returns every complete, in-range
//! coordinate read before the first problem. [`decode_strict`] reports the
//! problem instead.
//!
//! ```rust
//! use walk_navigator::{polyline, GpsPoint};
//!
//! let points = vec![GpsPoint::new(35.0116, 135.7681), GpsPoint::new(35.0041, 135.7681)];
//! let encoded = polyline::encode(&points);
//! let decoded = polyline::decode(&encoded);
//! assert_eq!(decoded.len(), 2);
//! assert!((decoded[1].latitude - 35.0041).abs() < 1e-5);
//! ```

use crate::error::PolylineError;
use crate::{GpsPoint, MapRegion};
use log::{debug, warn};

const PRECISION: f64 = 1e5;

/// Offset added to every 5-bit group to land in printable ASCII.
const CHAR_OFFSET: u8 = 63;
const CONTINUATION: i64 = 0x20;
const GROUP_MASK: i64 = 0x1f;

/// 12 groups carry 60 bits, far beyond any valid 1e5 delta.
const MAX_SHIFT: u32 = 60;

/// Minimum region span in degrees, so single points still get a usable map.
const MIN_SPAN_DEGREES: f64 = 0.01;

/// Margin factor applied to the region span.
const SPAN_MARGIN: f64 = 1.2;

/// Decode a polyline, keeping the valid prefix of malformed input.
///
/// Empty input gives an empty vector. A string that ends mid-value, contains a
/// byte outside the polyline alphabet, or decodes to an out-of-range coordinate
/// yields every complete pair decoded before that point.
pub fn decode(encoded: &str) -> Vec<GpsPoint> {
    let (points, error) = decode_prefix(encoded);
    match error {
        Some(e) => warn!(
            "[PolylineCodec] Malformed polyline ({} chars): {}; keeping {} points",
            encoded.len(),
            e,
            points.len()
        ),
        None => debug!("[PolylineCodec] Decoded {} points from {} chars", points.len(), encoded.len()),
    }
    points
}

/// Decode a polyline, failing on any malformed input.
pub fn decode_strict(encoded: &str) -> Result<Vec<GpsPoint>, PolylineError> {
    match decode_prefix(encoded) {
        (points, None) => Ok(points),
        (_, Some(e)) => Err(e),
    }
}

fn decode_prefix(encoded: &str) -> (Vec<GpsPoint>, Option<PolylineError>) {
    let bytes = encoded.as_bytes();
    let mut points = Vec::with_capacity(bytes.len() / 4);
    let mut offset = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;

    while offset < bytes.len() {
        let dlat = match read_value(bytes, &mut offset) {
            Ok(v) => v,
            Err(e) => return (points, Some(e)),
        };
        let dlng = match read_value(bytes, &mut offset) {
            Ok(v) => v,
            Err(e) => return (points, Some(e)),
        };

        lat = lat.saturating_add(dlat);
        lng = lng.saturating_add(dlng);

        let point = GpsPoint::new(lat as f64 / PRECISION, lng as f64 / PRECISION);
        if !point.is_valid() {
            let error = PolylineError::OutOfRange {
                index: points.len(),
                latitude: point.latitude,
                longitude: point.longitude,
            };
            return (points, Some(error));
        }
        points.push(point);
    }

    (points, None)
}

/// Read one zig-zag encoded value starting at `offset`, advancing it.
fn read_value(bytes: &[u8], offset: &mut usize) -> Result<i64, PolylineError> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;

    loop {
        let byte = match bytes.get(*offset) {
            Some(&b) => b,
            None => return Err(PolylineError::Truncated { offset: *offset }),
        };
        if !(CHAR_OFFSET..=b'~').contains(&byte) {
            return Err(PolylineError::InvalidCharacter { offset: *offset, byte });
        }
        if shift >= MAX_SHIFT {
            return Err(PolylineError::Overflow { offset: *offset });
        }
        *offset += 1;

        let group = (byte - CHAR_OFFSET) as i64;
        result |= (group & GROUP_MASK) << shift;
        shift += 5;

        if group & CONTINUATION == 0 {
            break;
        }
    }

    Ok(if result & 1 != 0 { !(result >> 1) } else { result >> 1 })
}

/// Encode points as a polyline string.
///
/// Coordinates are rounded to 1e-5 degrees, so `decode(encode(p))` matches `p`
/// to within that precision.
pub fn encode(points: &[GpsPoint]) -> String {
    let mut out = String::with_capacity(points.len() * 8);
    let mut prev_lat: i64 = 0;
    let mut prev_lng: i64 = 0;

    for p in points {
        let lat = (p.latitude * PRECISION).round() as i64;
        let lng = (p.longitude * PRECISION).round() as i64;
        write_value(lat - prev_lat, &mut out);
        write_value(lng - prev_lng, &mut out);
        prev_lat = lat;
        prev_lng = lng;
    }

    out
}

fn write_value(delta: i64, out: &mut String) {
    let mut value = ((delta << 1) ^ (delta >> 63)) as u64;
    while value >= CONTINUATION as u64 {
        let group = (CONTINUATION as u64 | (value & GROUP_MASK as u64)) as u8;
        out.push(char::from(group + CHAR_OFFSET));
        value >>= 5;
    }
    out.push(char::from(value as u8 + CHAR_OFFSET));
}

/// True iff the sequence is non-empty and every coordinate is in range.
pub fn is_valid(points: &[GpsPoint]) -> bool {
    !points.is_empty() && points.iter().all(GpsPoint::is_valid)
}

/// Map region enclosing the points with a 20% margin.
///
/// The center is the midpoint of the latitude and longitude extremes. Each span
/// is floored at 0.01 degrees before the margin is applied. Returns `None` for
/// empty input.
pub fn bounding_region(points: &[GpsPoint]) -> Option<MapRegion> {
    let first = points.first()?;
    let (mut min_lat, mut max_lat) = (first.latitude, first.latitude);
    let (mut min_lng, mut max_lng) = (first.longitude, first.longitude);

    for p in &points[1..] {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Some(MapRegion {
        center: GpsPoint::new((min_lat + max_lat) / 2.0, (min_lng + max_lng) / 2.0),
        lat_delta: (max_lat - min_lat).max(MIN_SPAN_DEGREES) * SPAN_MARGIN,
        lon_delta: (max_lng - min_lng).max(MIN_SPAN_DEGREES) * SPAN_MARGIN,
    })
}
