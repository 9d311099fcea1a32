//! Conversions between elements and geometries.

use std::str::FromStr;

use geo_traits::GeometryTrait;

use crate::elements::WkbElement;
use crate::error::{Result, SpatialError};
use crate::ewkb;

/// The geometry produced by `shape()` on an element.
pub type Shape = wkt::Wkt<f64>;

pub(crate) fn parse_wkt(text: &str) -> Result<Shape> {
    Shape::from_str(text).map_err(|err| SpatialError::ShapeConversion(err.to_string()))
}

pub(crate) fn parse_wkb(buf: &[u8]) -> Result<Shape> {
    let iso = ewkb::to_iso(buf)?;
    let wkb = wkb::reader::Wkb::try_new(&iso)?;
    let mut text = String::new();
    wkt::to_wkt::write_geometry(&mut text, &wkb)
        .map_err(|err| SpatialError::ShapeConversion(err.to_string()))?;
    parse_wkt(&text)
}

/// Build a WKB element from any geometry.
///
/// With `extended` set, the SRID is embedded in the payload (EWKB); otherwise
/// it is only carried on the element.
///
/// ```
/// use geo_types::Point;
/// use spatial_dialects::from_shape;
///
/// let element = from_shape(&Point::new(1.0, 2.0), 4326, true)?;
/// assert_eq!(element.srid(), 4326);
/// assert!(element.extended());
/// # Ok::<(), spatial_dialects::SpatialError>(())
/// ```
pub fn from_shape<G>(geometry: &G, srid: i32, extended: bool) -> Result<WkbElement>
where
    G: GeometryTrait<T = f64>,
{
    let mut buf = Vec::new();
    wkb::writer::write_geometry(&mut buf, geometry, &Default::default())?;
    if extended {
        buf = ewkb::inject_srid(&buf, srid);
    }
    Ok(WkbElement::from_parts(buf, Some(srid), Some(extended)))
}
