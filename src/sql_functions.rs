use crate::elements::{UNSET_SRID, WktElement};
use crate::error::{Result, SpatialError};
use crate::ewkb;
use crate::gpb::{gpb_srs_id, gpb_to_wkb, is_gpb, wkb_to_gpb};
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, LineTrait,
    MultiLineStringTrait, MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait, RectTrait,
    TriangleTrait,
};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Error};
use wkb::reader::Wkb;

#[derive(Clone, Copy)]
struct Bounds {
    minx: f64,
    maxx: f64,
    miny: f64,
    maxy: f64,
}

impl Bounds {
    fn intersects(&self, other: &Bounds) -> bool {
        self.minx <= other.maxx
            && self.maxx >= other.minx
            && self.miny <= other.maxy
            && self.maxy >= other.miny
    }

    fn contains(&self, other: &Bounds) -> bool {
        self.minx <= other.minx
            && self.maxx >= other.maxx
            && self.miny <= other.miny
            && self.maxy >= other.maxy
    }

    fn equals(&self, other: &Bounds) -> bool {
        self.minx == other.minx
            && self.maxx == other.maxx
            && self.miny == other.miny
            && self.maxy == other.maxy
    }
}

/// Register the geometry functions a GeoPackage needs without SpatiaLite.
///
/// Geometries are stored as GeoPackage binary blobs. The constructors
/// (`GeomFromEWKT`, `GeomFromText`, `GeomFromEWKB`, `GeomFromWKB`) produce
/// such blobs; the accessors accept them as well as (E)WKB bytes or hex.
///
/// Example:
/// ```
/// use rusqlite::Connection;
/// use spatial_dialects::register_spatial_functions;
///
/// let conn = Connection::open_in_memory()?;
/// register_spatial_functions(&conn)?;
/// let srid: i64 = conn.query_row(
///     "SELECT ST_SRID(GeomFromEWKT('SRID=4326;POINT(1 2)'))",
///     [],
///     |row| row.get(0),
/// )?;
/// assert_eq!(srid, 4326);
/// # Ok::<(), spatial_dialects::SpatialError>(())
/// ```
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    register_constructors(conn)?;
    register_accessors(conn)?;
    register_bounds_component(conn, "ST_MinX", |b| b.minx)?;
    register_bounds_component(conn, "ST_MinY", |b| b.miny)?;
    register_bounds_component(conn, "ST_MaxX", |b| b.maxx)?;
    register_bounds_component(conn, "ST_MaxY", |b| b.maxy)?;
    register_st_isempty(conn)?;
    register_mbr_predicate(conn, "MbrIntersects", |a, b| a.intersects(b))?;
    register_mbr_predicate(conn, "MbrContains", |a, b| a.contains(b))?;
    register_mbr_predicate(conn, "MbrWithin", |a, b| b.contains(a))?;
    register_mbr_predicate(conn, "MbrEqual", |a, b| a.equals(b))?;
    tracing::debug!("registered native GeoPackage functions");
    Ok(())
}

fn user_error(err: impl Into<SpatialError>) -> Error {
    Error::UserFunctionError(Box::new(err.into()))
}

fn check_arity(ctx: &Context<'_>, name: &str, max: usize) -> rusqlite::Result<()> {
    if ctx.is_empty() || ctx.len() > max {
        return Err(user_error(SpatialError::Argument(format!(
            "{name} takes 1 to {max} arguments, got {}",
            ctx.len()
        ))));
    }
    Ok(())
}

/// SRID argument at `idx`, if given; unknown SRIDs become `0`.
fn srid_arg(ctx: &Context<'_>, idx: usize, default: i32) -> rusqlite::Result<i32> {
    let srid = if idx < ctx.len() {
        ctx.get::<Option<i32>>(idx)?.unwrap_or(default)
    } else {
        default
    };
    Ok(srid.max(0))
}

fn to_gpb<G: GeometryTrait<T = f64>>(geometry: &G, srid: i32) -> Result<Vec<u8>> {
    let mut wkb = Vec::new();
    wkb::writer::write_geometry(&mut wkb, geometry, &Default::default())?;
    Ok(wkb_to_gpb(&wkb, srid))
}

fn register_constructors(conn: &Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("GeomFromEWKT", 1, flags, |ctx| {
        let Some(text) = ctx.get::<Option<String>>(0)? else {
            return Ok(None);
        };
        let element = WktElement::new(text);
        let srid = if element.srid() == UNSET_SRID {
            0
        } else {
            element.srid()
        };
        let shape = element.shape().map_err(user_error)?;
        to_gpb(shape, srid).map(Some).map_err(user_error)
    })?;

    conn.create_scalar_function("GeomFromText", -1, flags, |ctx| {
        check_arity(ctx, "GeomFromText", 2)?;
        let Some(text) = ctx.get::<Option<String>>(0)? else {
            return Ok(None);
        };
        let srid = srid_arg(ctx, 1, 0)?;
        let element = WktElement::new(text);
        let shape = element.shape().map_err(user_error)?;
        to_gpb(shape, srid).map(Some).map_err(user_error)
    })?;

    conn.create_scalar_function("GeomFromEWKB", 1, flags, |ctx| {
        let Some(ewkb) = raw_bytes(ctx, 0)? else {
            return Ok(None);
        };
        let srid = ewkb::read_srid(&ewkb).unwrap_or(0);
        let iso = ewkb::to_iso(&ewkb).map_err(user_error)?;
        Ok(Some(wkb_to_gpb(&iso, srid.max(0))))
    })?;

    conn.create_scalar_function("GeomFromWKB", -1, flags, |ctx| {
        check_arity(ctx, "GeomFromWKB", 2)?;
        let Some(wkb) = raw_bytes(ctx, 0)? else {
            return Ok(None);
        };
        let srid = srid_arg(ctx, 1, 0)?;
        let iso = ewkb::to_iso(&wkb).map_err(user_error)?;
        Ok(Some(wkb_to_gpb(&iso, srid)))
    })?;
    Ok(())
}

fn register_accessors(conn: &Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    // hex text, as SpatiaLite returns it
    conn.create_scalar_function("AsEWKB", 1, flags, |ctx| {
        let Some((wkb, srid)) = geometry_arg(ctx, 0)? else {
            return Ok(None);
        };
        let ewkb = ewkb::to_extended(&wkb, (srid > 0).then_some(srid)).map_err(user_error)?;
        Ok(Some(hex::encode(ewkb)))
    })?;

    conn.create_scalar_function("AsBinary", 1, flags, |ctx| {
        Ok(geometry_arg(ctx, 0)?.map(|(wkb, _)| wkb))
    })?;

    conn.create_scalar_function("AsText", 1, flags, |ctx| {
        let Some((wkb, _)) = geometry_arg(ctx, 0)? else {
            return Ok(None);
        };
        let wkb = Wkb::try_new(&wkb).map_err(user_error)?;
        let mut text = String::new();
        wkt::to_wkt::write_geometry(&mut text, &wkb)
            .map_err(|err| user_error(SpatialError::ShapeConversion(err.to_string())))?;
        Ok(Some(text))
    })?;

    conn.create_scalar_function("ST_SRID", 1, flags, |ctx| {
        Ok(geometry_arg(ctx, 0)?.map(|(_, srid)| i64::from(srid)))
    })?;
    Ok(())
}

fn register_st_isempty(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsEmpty",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let Some(bounds) = bounds_arg(ctx, 0)? else {
                return Ok(None);
            };
            Ok(Some(i64::from(bounds.is_none())))
        },
    )?;
    Ok(())
}

fn register_bounds_component<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(Bounds) -> f64 + Copy + Send + Sync + 'static,
{
    conn.create_scalar_function(name, 1, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        Ok(bounds_arg(ctx, 0)?.flatten().map(f))
    })?;
    Ok(())
}

fn register_mbr_predicate<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(&Bounds, &Bounds) -> bool + Copy + Send + Sync + 'static,
{
    conn.create_scalar_function(name, 2, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        let (Some(a), Some(b)) = (bounds_arg(ctx, 0)?, bounds_arg(ctx, 1)?) else {
            return Ok(None);
        };
        // empty geometries have no rectangle to compare
        let result = match (a, b) {
            (Some(a), Some(b)) => f(&a, &b),
            _ => false,
        };
        Ok(Some(i64::from(result)))
    })?;
    Ok(())
}

fn raw_bytes(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Option<Vec<u8>>> {
    match ctx.get_raw(idx) {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(blob) => Ok(Some(blob.to_vec())),
        ValueRef::Text(text) => hex::decode(text).map(Some).map_err(user_error),
        _ => Err(Error::InvalidFunctionParameterType(idx, Type::Blob)),
    }
}

/// ISO WKB and SRID of a geometry argument.
fn geometry_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Option<(Vec<u8>, i32)>> {
    let Some(bytes) = raw_bytes(ctx, idx)? else {
        return Ok(None);
    };
    decode_geometry(&bytes).map(Some).map_err(user_error)
}

fn decode_geometry(bytes: &[u8]) -> Result<(Vec<u8>, i32)> {
    if is_gpb(bytes) {
        let srid = gpb_srs_id(bytes)?;
        Ok((ewkb::to_iso(gpb_to_wkb(bytes)?)?, srid))
    } else {
        let srid = ewkb::read_srid(bytes).unwrap_or(0);
        Ok((ewkb::to_iso(bytes)?, srid))
    }
}

/// `None` for SQL NULL, `Some(None)` for an empty geometry.
fn bounds_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Option<Option<Bounds>>> {
    let Some((wkb, _)) = geometry_arg(ctx, idx)? else {
        return Ok(None);
    };
    let wkb = Wkb::try_new(&wkb).map_err(user_error)?;
    Ok(Some(bounds_from_geometry(&wkb)))
}

fn bounds_from_geometry<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Bounds> {
    use geo_traits::GeometryType as GeoType;

    let mut bounds: Option<Bounds> = None;
    match geom.as_type() {
        GeoType::Point(point) => {
            if let Some(coord) = point.coord() {
                add_coord(&mut bounds, &coord);
            }
        }
        GeoType::LineString(line) => add_line_string(&mut bounds, line),
        GeoType::Polygon(poly) => add_polygon(&mut bounds, poly),
        GeoType::MultiPoint(multi) => {
            for point in multi.points() {
                if let Some(coord) = point.coord() {
                    add_coord(&mut bounds, &coord);
                }
            }
        }
        GeoType::MultiLineString(multi) => {
            for line in multi.line_strings() {
                add_line_string(&mut bounds, &line);
            }
        }
        GeoType::MultiPolygon(multi) => {
            for poly in multi.polygons() {
                add_polygon(&mut bounds, &poly);
            }
        }
        GeoType::GeometryCollection(collection) => {
            for sub_geom in collection.geometries() {
                if let Some(sub_bounds) = bounds_from_geometry(&sub_geom) {
                    merge_bounds(&mut bounds, sub_bounds);
                }
            }
        }
        GeoType::Rect(rect) => {
            add_coord(&mut bounds, &rect.min());
            add_coord(&mut bounds, &rect.max());
        }
        GeoType::Triangle(triangle) => {
            for coord in triangle.coords() {
                add_coord(&mut bounds, &coord);
            }
        }
        GeoType::Line(line) => {
            add_coord(&mut bounds, &line.start());
            add_coord(&mut bounds, &line.end());
        }
    }

    bounds
}

fn add_polygon<P: PolygonTrait<T = f64>>(bounds: &mut Option<Bounds>, poly: &P) {
    if let Some(ring) = poly.exterior() {
        add_line_string(bounds, &ring);
    }
    for ring in poly.interiors() {
        add_line_string(bounds, &ring);
    }
}

fn add_line_string<L: LineStringTrait<T = f64>>(bounds: &mut Option<Bounds>, line: &L) {
    for coord in line.coords() {
        add_coord(bounds, &coord);
    }
}

fn add_coord<C: CoordTrait<T = f64>>(bounds: &mut Option<Bounds>, coord: &C) {
    let (x, y) = coord.x_y();
    // empty points are written with NaN coordinates
    if x.is_nan() || y.is_nan() {
        return;
    }
    match bounds {
        Some(existing) => {
            existing.minx = existing.minx.min(x);
            existing.maxx = existing.maxx.max(x);
            existing.miny = existing.miny.min(y);
            existing.maxy = existing.maxy.max(y);
        }
        None => {
            *bounds = Some(Bounds {
                minx: x,
                maxx: x,
                miny: y,
                maxy: y,
            });
        }
    }
}

fn merge_bounds(bounds: &mut Option<Bounds>, other: Bounds) {
    match bounds {
        Some(existing) => {
            existing.minx = existing.minx.min(other.minx);
            existing.maxx = existing.maxx.max(other.maxx);
            existing.miny = existing.miny.min(other.miny);
            existing.maxy = existing.maxy.max(other.maxy);
        }
        None => *bounds = Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::register_spatial_functions;
    use crate::gpb::{gpb_srs_id, is_gpb, wkb_to_gpb};
    use crate::shape::from_shape;
    use geo_traits::GeometryTrait;
    use geo_types::{Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, Point};
    use rusqlite::{Connection, params};

    fn gpkg_blob_from_geometry(geometry: &impl GeometryTrait<T = f64>) -> crate::Result<Vec<u8>> {
        let element = from_shape(geometry, -1, false)?;
        Ok(wkb_to_gpb(&element.to_bytes()?, 4326))
    }

    fn connection() -> crate::Result<Connection> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;
        Ok(conn)
    }

    type Bounds = (Option<f64>, Option<f64>, Option<f64>, Option<f64>, i64);

    fn bounds(conn: &Connection, blob: &[u8]) -> crate::Result<Bounds> {
        Ok(conn.query_row(
            "SELECT ST_MinX(?1), ST_MinY(?1), ST_MaxX(?1), ST_MaxY(?1), ST_IsEmpty(?1)",
            params![blob],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?)
    }

    #[test]
    fn envelope_of_each_geometry_kind() -> crate::Result<()> {
        let conn = connection()?;
        let cases: Vec<(Geometry<f64>, [f64; 4])> = vec![
            (Point::new(1.5, -2.0).into(), [1.5, -2.0, 1.5, -2.0]),
            (
                MultiPoint::from(vec![Point::new(1.0, 5.0), Point::new(-2.0, 3.0)]).into(),
                [-2.0, 3.0, 1.0, 5.0],
            ),
            (
                MultiLineString(vec![
                    LineString::from(vec![(0.0, 0.0), (2.0, 1.0)]),
                    LineString::from(vec![(-3.0, 4.0), (-1.0, 2.0)]),
                ])
                .into(),
                [-3.0, 0.0, 2.0, 4.0],
            ),
            (
                Geometry::GeometryCollection(GeometryCollection::from(vec![
                    Geometry::Point(Point::new(5.0, -1.0)),
                    Geometry::LineString(LineString::from(vec![(-2.0, 2.0), (1.0, 3.0)])),
                ])),
                [-2.0, -1.0, 5.0, 3.0],
            ),
        ];
        for (geometry, [minx, miny, maxx, maxy]) in cases {
            let blob = gpkg_blob_from_geometry(&geometry)?;
            assert_eq!(
                bounds(&conn, &blob)?,
                (Some(minx), Some(miny), Some(maxx), Some(maxy), 0),
                "{geometry:?}"
            );
        }
        Ok(())
    }

    #[test]
    fn empty_geometry_has_no_envelope() -> crate::Result<()> {
        let conn = connection()?;
        let blob = gpkg_blob_from_geometry(&LineString::<f64>::new(Vec::new()))?;
        assert_eq!(bounds(&conn, &blob)?, (None, None, None, None, 1));
        Ok(())
    }

    #[test]
    fn ewkt_round_trips_through_gpkg_blob() -> crate::Result<()> {
        let conn = connection()?;

        let blob: Vec<u8> = conn.query_row(
            "SELECT GeomFromEWKT('SRID=4326;POINT(1 2)')",
            [],
            |row| row.get(0),
        )?;
        assert!(is_gpb(&blob));
        assert_eq!(gpb_srs_id(&blob)?, 4326);

        let (ewkb, text, srid): (String, String, i64) = conn.query_row(
            "SELECT AsEWKB(?1), AsText(?1), ST_SRID(?1)",
            params![blob],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        assert_eq!(ewkb, "0101000020e6100000000000000000f03f0000000000000040");
        assert_eq!(text, "POINT(1 2)");
        assert_eq!(srid, 4326);
        Ok(())
    }

    #[test]
    fn constructors_take_explicit_srid_and_hex() -> crate::Result<()> {
        let conn = connection()?;

        let srid: i64 = conn.query_row(
            "SELECT ST_SRID(GeomFromText('POINT(1 2)', 3857))",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(srid, 3857);

        let srid: i64 = conn.query_row(
            "SELECT ST_SRID(GeomFromEWKB('0101000020e6100000000000000000f03f0000000000000040'))",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(srid, 4326);

        let wkb: Vec<u8> = conn.query_row(
            "SELECT AsBinary(GeomFromWKB(X'0101000000000000000000f03f0000000000000040'))",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(hex::encode(wkb), "0101000000000000000000f03f0000000000000040");

        let null: Option<Vec<u8>> =
            conn.query_row("SELECT GeomFromEWKT(NULL)", [], |row| row.get(0))?;
        assert!(null.is_none());
        Ok(())
    }

    #[test]
    fn mbr_predicates() -> crate::Result<()> {
        let conn = connection()?;

        let (intersects, contains, within, equal, apart): (i64, i64, i64, i64, i64) = conn
            .query_row(
                "SELECT
                   MbrIntersects(GeomFromText('LINESTRING(0 0, 2 2)'), GeomFromText('POINT(1 1)')),
                   MbrContains(GeomFromText('LINESTRING(0 0, 2 2)'), GeomFromText('POINT(1 1)')),
                   MbrWithin(GeomFromText('POINT(1 1)'), GeomFromText('LINESTRING(0 0, 2 2)')),
                   MbrEqual(GeomFromText('POINT(1 1)'), GeomFromText('POINT(1 1)')),
                   MbrIntersects(GeomFromText('POINT(5 5)'), GeomFromText('POINT(1 1)'))",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )?;
        assert_eq!((intersects, contains, within, equal, apart), (1, 1, 1, 1, 0));
        Ok(())
    }

    #[test]
    fn invalid_text_is_a_function_error() -> crate::Result<()> {
        let conn = connection()?;
        let result: rusqlite::Result<Vec<u8>> =
            conn.query_row("SELECT GeomFromText('POINT(1')", [], |row| row.get(0));
        assert!(result.is_err());
        Ok(())
    }
}
