//! Value wrappers around WKT, WKB and raster payloads.
//!
//! Elements are what a spatial column hands back after a fetch and what user
//! code passes when binding a spatial value. The payload is kept verbatim; a
//! parsed shape is only produced on demand and memoized.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpatialError};
use crate::ewkb;
use crate::shape::{self, Shape};

/// SRID of an element constructed without one.
pub const UNSET_SRID: i32 = -1;

const EWKT_PREFIX: &str = "SRID=";

/// A WKT or EWKT value.
#[derive(Debug, Serialize, Deserialize)]
pub struct WktElement {
    data: String,
    srid: i32,
    extended: bool,
    #[serde(skip)]
    shape: OnceLock<Shape>,
}

impl WktElement {
    /// Wrap a WKT or EWKT string; the SRID is taken from an `SRID=` prefix
    /// when one is present.
    pub fn new(data: impl Into<String>) -> Self {
        Self::from_parts(data, None, None)
    }

    /// Wrap a plain WKT string with an explicit SRID.
    pub fn with_srid(data: impl Into<String>, srid: i32) -> Self {
        Self::from_parts(data, Some(srid), None)
    }

    /// Build an element from all of its parts.
    ///
    /// `extended = None` detects the `SRID=` prefix. With `extended` set and no
    /// explicit SRID, the SRID is read from the prefix; a prefix that cannot be
    /// parsed yields SRID `0`.
    pub fn from_parts(data: impl Into<String>, srid: Option<i32>, extended: Option<bool>) -> Self {
        let data = data.into();
        let extended = extended.unwrap_or_else(|| has_ewkt_prefix(&data));
        let srid = match srid {
            Some(srid) => srid,
            None if extended => parse_ewkt_srid(&data).unwrap_or(0),
            None => UNSET_SRID,
        };
        Self {
            data,
            srid,
            extended,
            shape: OnceLock::new(),
        }
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn srid(&self) -> i32 {
        self.srid
    }

    pub fn extended(&self) -> bool {
        self.extended
    }

    /// The payload as stored.
    pub fn desc(&self) -> &str {
        &self.data
    }

    /// The payload without any `SRID=n;` prefix.
    pub fn wkt_body(&self) -> &str {
        strip_ewkt_prefix(&self.data)
    }

    /// Plain WKT carrying the SRID out of band.
    pub fn as_wkt(&self) -> WktElement {
        if self.extended {
            WktElement::from_parts(self.wkt_body(), Some(self.srid), Some(false))
        } else {
            self.clone()
        }
    }

    /// EWKT with the SRID embedded, when the element has one.
    pub fn as_ewkt(&self) -> WktElement {
        if !self.extended && self.srid != UNSET_SRID {
            WktElement::from_parts(format!("SRID={};{}", self.srid, self.data), None, Some(true))
        } else {
            self.clone()
        }
    }

    /// Parsed geometry, computed on first access.
    pub fn shape(&self) -> Result<&Shape> {
        if let Some(shape) = self.shape.get() {
            return Ok(shape);
        }
        let parsed = shape::parse_wkt(self.wkt_body())?;
        Ok(self.shape.get_or_init(|| parsed))
    }
}

impl Clone for WktElement {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            srid: self.srid,
            extended: self.extended,
            shape: OnceLock::new(),
        }
    }
}

fn has_ewkt_prefix(data: &str) -> bool {
    data.get(..EWKT_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(EWKT_PREFIX))
}

fn parse_ewkt_srid(data: &str) -> Option<i32> {
    if !has_ewkt_prefix(data) {
        return None;
    }
    let (srid, _) = data.get(EWKT_PREFIX.len()..)?.split_once(';')?;
    srid.trim().parse().ok()
}

pub(crate) fn strip_ewkt_prefix(data: &str) -> &str {
    if !has_ewkt_prefix(data) {
        return data;
    }
    match data.split_once(';') {
        Some((_, body)) => body.trim_start(),
        None => data,
    }
}

/// WKB payload as raw bytes or as hex text (SpatiaLite returns hex).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WkbData {
    Bytes(Vec<u8>),
    Hex(String),
}

impl WkbData {
    /// Decode to raw bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::Hex(text) => Ok(hex::decode(text)?),
        }
    }

    /// Lower-case hex text.
    pub fn to_hex(&self) -> String {
        match self {
            Self::Bytes(bytes) => hex::encode(bytes),
            Self::Hex(text) => text.to_ascii_lowercase(),
        }
    }

    fn header_bytes(&self) -> Vec<u8> {
        match self {
            Self::Bytes(bytes) => bytes.iter().take(9).copied().collect(),
            Self::Hex(text) => {
                let end = text.len().min(18) & !1;
                text.get(..end)
                    .and_then(|head| hex::decode(head).ok())
                    .unwrap_or_default()
            }
        }
    }

    fn same_encoding(&self, bytes: Vec<u8>) -> WkbData {
        match self {
            Self::Bytes(_) => Self::Bytes(bytes),
            Self::Hex(_) => Self::Hex(hex::encode(bytes)),
        }
    }
}

impl From<Vec<u8>> for WkbData {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for WkbData {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<String> for WkbData {
    fn from(value: String) -> Self {
        Self::Hex(value)
    }
}

impl From<&str> for WkbData {
    fn from(value: &str) -> Self {
        Self::Hex(value.to_string())
    }
}

/// A WKB or EWKB value.
#[derive(Debug, Serialize, Deserialize)]
pub struct WkbElement {
    data: WkbData,
    srid: i32,
    extended: bool,
    #[serde(skip)]
    shape: OnceLock<Shape>,
}

impl WkbElement {
    /// Wrap WKB or EWKB, reading the SRID from the header when the SRID flag
    /// is set.
    pub fn new(data: impl Into<WkbData>) -> Self {
        Self::from_parts(data, None, None)
    }

    /// Wrap plain WKB with an explicit SRID.
    pub fn with_srid(data: impl Into<WkbData>, srid: i32) -> Self {
        Self::from_parts(data, Some(srid), None)
    }

    /// Build an element from all of its parts.
    ///
    /// `extended = None` detects the SRID flag in the type word. With
    /// `extended` set and no explicit SRID, the SRID is read from the header;
    /// a truncated header yields SRID `0`.
    pub fn from_parts(data: impl Into<WkbData>, srid: Option<i32>, extended: Option<bool>) -> Self {
        let data = data.into();
        let header = data.header_bytes();
        let extended = extended.unwrap_or_else(|| {
            ewkb::read_header(&header).is_some_and(|header| header.has_srid())
        });
        let srid = match srid {
            Some(srid) => srid,
            None if extended => ewkb::read_srid(&header).unwrap_or(0),
            None => UNSET_SRID,
        };
        Self {
            data,
            srid,
            extended,
            shape: OnceLock::new(),
        }
    }

    pub fn data(&self) -> &WkbData {
        &self.data
    }

    pub fn srid(&self) -> i32 {
        self.srid
    }

    pub fn extended(&self) -> bool {
        self.extended
    }

    /// Lower-case hex of the payload.
    pub fn desc(&self) -> String {
        self.data.to_hex()
    }

    /// Raw payload bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.data.to_bytes()
    }

    /// Plain WKB with the SRID carried out of band.
    pub fn as_wkb(&self) -> Result<WkbElement> {
        if !self.extended {
            return Ok(self.clone());
        }
        let bytes = ewkb::strip_srid(&self.data.to_bytes()?);
        Ok(WkbElement::from_parts(
            self.data.same_encoding(bytes),
            Some(self.srid),
            Some(false),
        ))
    }

    /// EWKB with the SRID embedded, when the element has one.
    pub fn as_ewkb(&self) -> Result<WkbElement> {
        if self.extended || self.srid == UNSET_SRID {
            return Ok(self.clone());
        }
        let bytes = ewkb::inject_srid(&self.data.to_bytes()?, self.srid);
        Ok(WkbElement::from_parts(
            self.data.same_encoding(bytes),
            Some(self.srid),
            Some(true),
        ))
    }

    /// Parsed geometry, computed on first access.
    pub fn shape(&self) -> Result<&Shape> {
        if let Some(shape) = self.shape.get() {
            return Ok(shape);
        }
        let parsed = shape::parse_wkb(&self.data.to_bytes()?)?;
        Ok(self.shape.get_or_init(|| parsed))
    }
}

impl Clone for WkbElement {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            srid: self.srid,
            extended: self.extended,
            shape: OnceLock::new(),
        }
    }
}

// Byte offset of the SRID in the raster WKB header.
const RASTER_SRID_OFFSET: usize = 53;

/// A PostGIS raster value, kept as hex text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterElement {
    data: String,
    srid: i32,
}

impl RasterElement {
    pub fn new(data: impl Into<WkbData>) -> Self {
        let data = data.into().to_hex();
        let end = data.len().min(2 * (RASTER_SRID_OFFSET + 4));
        let header = data
            .get(..end & !1)
            .and_then(|header| hex::decode(header).ok())
            .unwrap_or_default();
        let srid = raster_srid(&header).unwrap_or(0);
        Self { data, srid }
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn srid(&self) -> i32 {
        self.srid
    }

    /// Rasters always carry their SRID.
    pub fn extended(&self) -> bool {
        true
    }

    pub fn desc(&self) -> &str {
        &self.data
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(hex::decode(&self.data)?)
    }
}

fn raster_srid(header: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = header
        .get(RASTER_SRID_OFFSET..RASTER_SRID_OFFSET + 4)?
        .try_into()
        .ok()?;
    Some(match header.first()? {
        0 => i32::from_be_bytes(bytes),
        _ => i32::from_le_bytes(bytes),
    })
}

/// Any spatial value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SpatialElement {
    Wkt(WktElement),
    Wkb(WkbElement),
    Raster(RasterElement),
}

impl SpatialElement {
    pub fn srid(&self) -> i32 {
        match self {
            Self::Wkt(element) => element.srid(),
            Self::Wkb(element) => element.srid(),
            Self::Raster(element) => element.srid(),
        }
    }

    pub fn extended(&self) -> bool {
        match self {
            Self::Wkt(element) => element.extended(),
            Self::Wkb(element) => element.extended(),
            Self::Raster(element) => element.extended(),
        }
    }

    /// Normalized description of the payload (hex for binary payloads).
    pub fn desc(&self) -> String {
        match self {
            Self::Wkt(element) => element.desc().to_string(),
            Self::Wkb(element) => element.desc(),
            Self::Raster(element) => element.desc().to_string(),
        }
    }

    pub fn shape(&self) -> Result<&Shape> {
        match self {
            Self::Wkt(element) => element.shape(),
            Self::Wkb(element) => element.shape(),
            Self::Raster(_) => Err(SpatialError::ShapeConversion(
                "raster values have no vector shape".to_string(),
            )),
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            Self::Wkt(_) => 0,
            Self::Wkb(_) => 1,
            Self::Raster(_) => 2,
        }
    }
}

impl PartialEq for SpatialElement {
    fn eq(&self, other: &Self) -> bool {
        self.discriminant() == other.discriminant()
            && self.srid() == other.srid()
            && self.desc() == other.desc()
    }
}

impl Eq for SpatialElement {}

impl Hash for SpatialElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        self.desc().hash(state);
        self.srid().hash(state);
    }
}

impl fmt::Display for SpatialElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.desc())
    }
}

impl From<WktElement> for SpatialElement {
    fn from(value: WktElement) -> Self {
        Self::Wkt(value)
    }
}

impl From<WkbElement> for SpatialElement {
    fn from(value: WkbElement) -> Self {
        Self::Wkb(value)
    }
}

impl From<RasterElement> for SpatialElement {
    fn from(value: RasterElement) -> Self {
        Self::Raster(value)
    }
}
