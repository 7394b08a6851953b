//! Shape records of the `.shp` main file.
//!
//! Geometries arrive as `geo-types` values decoded from WKB. Each one is
//! converted into a [`Shape`] of the single [`ShapeType`] chosen for the
//! whole file, then encoded with the little-endian record layout of the
//! ESRI Shapefile technical description.

use std::fmt;

use bytes::{BufMut, BytesMut};
use geo_types::{Coord, Geometry, LineString, Polygon};
use geozero::ToGeo;
use geozero::wkb::Wkb;
use pgshp_core_common::GeoTable;
use pgshp_shared::{SpatialWriteError, SpatialWriteResult};

/// Output geometry type of a Shapefile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeType {
    /// No geometry.
    Null,
    /// Single points.
    Point,
    /// Lines made of one or more parts.
    PolyLine,
    /// Polygons made of one or more rings.
    Polygon,
    /// Point sets.
    MultiPoint,
}

impl ShapeType {
    /// Numeric shape type code stored in headers and records.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Null => 0,
            Self::Point => 1,
            Self::PolyLine => 3,
            Self::Polygon => 5,
            Self::MultiPoint => 8,
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Point => "Point",
            Self::PolyLine => "PolyLine",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
        }
    }
}

impl fmt::Display for ShapeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Axis-aligned extent of one or more shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Extent of `coords`, or `None` if there are none.
    pub fn from_coords<'a>(coords: impl IntoIterator<Item = &'a Coord>) -> Option<Self> {
        let mut coords = coords.into_iter();
        let first = coords.next()?;
        let mut bbox = Self {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for coord in coords {
            bbox.min_x = bbox.min_x.min(coord.x);
            bbox.min_y = bbox.min_y.min(coord.y);
            bbox.max_x = bbox.max_x.max(coord.x);
            bbox.max_y = bbox.max_y.max(coord.y);
        }
        Some(bbox)
    }

    /// Grows this box to cover `other`.
    pub fn extend(&mut self, other: &Self) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_f64_le(self.min_x);
        buf.put_f64_le(self.min_y);
        buf.put_f64_le(self.max_x);
        buf.put_f64_le(self.max_y);
    }
}

/// One record of the main file.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Null,
    Point(Coord),
    MultiPoint(Vec<Coord>),
    PolyLine(Vec<Vec<Coord>>),
    Polygon(Vec<Vec<Coord>>),
}

impl Shape {
    /// Extent of the shape; `None` for null shapes.
    #[must_use]
    pub fn bbox(&self) -> Option<BoundingBox> {
        match self {
            Self::Null => None,
            Self::Point(coord) => BoundingBox::from_coords([coord]),
            Self::MultiPoint(points) => BoundingBox::from_coords(points),
            Self::PolyLine(parts) | Self::Polygon(parts) => {
                BoundingBox::from_coords(parts.iter().flatten())
            },
        }
    }

    /// Size of the record content in bytes.
    #[must_use]
    pub fn content_len(&self) -> usize {
        match self {
            Self::Null => 4,
            Self::Point(_) => 20,
            Self::MultiPoint(points) => 40 + 16 * points.len(),
            Self::PolyLine(parts) | Self::Polygon(parts) => {
                let points: usize = parts.iter().map(Vec::len).sum();
                44 + 4 * parts.len() + 16 * points
            },
        }
    }

    /// Appends the record content (without the record header).
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Null => buf.put_i32_le(ShapeType::Null.code()),
            Self::Point(coord) => {
                buf.put_i32_le(ShapeType::Point.code());
                put_coord(buf, coord);
            },
            Self::MultiPoint(points) => {
                buf.put_i32_le(ShapeType::MultiPoint.code());
                self.put_bbox(buf);
                buf.put_i32_le(to_i32(points.len()));
                for point in points {
                    put_coord(buf, point);
                }
            },
            Self::PolyLine(parts) | Self::Polygon(parts) => {
                let shape_type = if matches!(self, Self::Polygon(_)) {
                    ShapeType::Polygon
                } else {
                    ShapeType::PolyLine
                };
                buf.put_i32_le(shape_type.code());
                self.put_bbox(buf);
                buf.put_i32_le(to_i32(parts.len()));
                buf.put_i32_le(to_i32(parts.iter().map(Vec::len).sum()));
                let mut start = 0;
                for part in parts {
                    buf.put_i32_le(to_i32(start));
                    start += part.len();
                }
                for coord in parts.iter().flatten() {
                    put_coord(buf, coord);
                }
            },
        }
    }

    fn put_bbox(&self, buf: &mut BytesMut) {
        let bbox = self.bbox().unwrap_or(BoundingBox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 0.0,
            max_y: 0.0,
        });
        bbox.put(buf);
    }
}

fn put_coord(buf: &mut BytesMut, coord: &Coord) {
    buf.put_f64_le(coord.x);
    buf.put_f64_le(coord.y);
}

// Counts are bounded by the 2 GiB size check done before encoding.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn to_i32(value: usize) -> i32 {
    value as i32
}

/// Decodes the WKB geometry column of `table`, one entry per row.
///
/// # Errors
///
/// Returns [`SpatialWriteError::InvalidGeometry`] for a value that is not
/// valid WKB.
pub fn decode_geometries(table: &GeoTable) -> SpatialWriteResult<Vec<Option<Geometry>>> {
    table
        .geometries()
        .enumerate()
        .map(|(index, wkb)| {
            wkb.map(|bytes| {
                Wkb(bytes)
                    .to_geo()
                    .map_err(|err| SpatialWriteError::InvalidGeometry {
                        row: index + 1,
                        message: err.to_string(),
                    })
            })
            .transpose()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Point,
    Line,
    Polygon,
}

impl Family {
    fn shape_type(self, multi: bool) -> ShapeType {
        match self {
            Self::Point if multi => ShapeType::MultiPoint,
            Self::Point => ShapeType::Point,
            Self::Line => ShapeType::PolyLine,
            Self::Polygon => ShapeType::Polygon,
        }
    }
}

/// Name of the geometry type, as used in messages.
#[must_use]
pub fn geometry_type_name(geometry: &Geometry) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Family of `geometry` and whether it needs the multi-part point type.
///
/// Returns `Ok(None)` for empty geometries, which become null shapes.
fn classify(geometry: &Geometry, row: usize) -> SpatialWriteResult<Option<(Family, bool)>> {
    if is_empty(geometry) {
        return Ok(None);
    }
    let class = match geometry {
        Geometry::Point(_) => (Family::Point, false),
        Geometry::MultiPoint(_) => (Family::Point, true),
        Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
            (Family::Line, false)
        },
        Geometry::Polygon(_)
        | Geometry::MultiPolygon(_)
        | Geometry::Rect(_)
        | Geometry::Triangle(_) => (Family::Polygon, false),
        Geometry::GeometryCollection(_) => {
            return Err(SpatialWriteError::UnsupportedGeometryType {
                geometry_type: geometry_type_name(geometry).to_string(),
                row,
            });
        },
    };
    Ok(Some(class))
}

fn is_empty(geometry: &Geometry) -> bool {
    match geometry {
        Geometry::Point(point) => point.x().is_nan() || point.y().is_nan(),
        Geometry::LineString(line) => line.0.is_empty(),
        Geometry::Polygon(polygon) => polygon.exterior().0.is_empty(),
        Geometry::MultiPoint(points) => points.0.is_empty(),
        Geometry::MultiLineString(lines) => lines.0.iter().all(|line| line.0.is_empty()),
        Geometry::MultiPolygon(polygons) => polygons
            .0
            .iter()
            .all(|polygon| polygon.exterior().0.is_empty()),
        Geometry::GeometryCollection(collection) => collection.0.is_empty(),
        Geometry::Line(_) | Geometry::Rect(_) | Geometry::Triangle(_) => false,
    }
}

/// Picks the one shape type able to hold every geometry.
///
/// Points and multi-points share [`ShapeType::MultiPoint`] when both occur.
/// A table whose geometries are all null or empty gets [`ShapeType::Null`].
///
/// # Errors
///
/// Returns [`SpatialWriteError::MixedGeometryTypes`] when geometries belong
/// to different families, and [`SpatialWriteError::UnsupportedGeometryType`]
/// for geometry collections.
pub fn resolve_shape_type(geometries: &[Option<Geometry>]) -> SpatialWriteResult<ShapeType> {
    let mut resolved: Option<(Family, bool)> = None;

    for (index, geometry) in geometries.iter().enumerate() {
        let Some(geometry) = geometry else {
            continue;
        };
        let Some((family, multi)) = classify(geometry, index + 1)? else {
            continue;
        };
        match resolved {
            None => resolved = Some((family, multi)),
            Some((first, _)) if first != family => {
                return Err(SpatialWriteError::MixedGeometryTypes {
                    first: first.shape_type(false).name().to_string(),
                    found: geometry_type_name(geometry).to_string(),
                    row: index + 1,
                });
            },
            Some((first, seen_multi)) => resolved = Some((first, seen_multi || multi)),
        }
    }

    Ok(resolved.map_or(ShapeType::Null, |(family, multi)| {
        family.shape_type(multi)
    }))
}

/// Converts a geometry into a record of `shape_type`.
///
/// `shape_type` must come from [`resolve_shape_type`] over the same data.
/// Null and empty geometries become [`Shape::Null`].
#[must_use]
pub fn to_shape(geometry: Option<&Geometry>, shape_type: ShapeType) -> Shape {
    let Some(geometry) = geometry.filter(|geometry| !is_empty(geometry)) else {
        return Shape::Null;
    };

    match (shape_type, geometry) {
        (ShapeType::Point, Geometry::Point(point)) => Shape::Point(point.0),
        (ShapeType::MultiPoint, Geometry::Point(point)) => Shape::MultiPoint(vec![point.0]),
        (ShapeType::MultiPoint, Geometry::MultiPoint(points)) => {
            Shape::MultiPoint(points.0.iter().map(|point| point.0).collect())
        },
        (ShapeType::PolyLine, Geometry::Line(line)) => {
            Shape::PolyLine(vec![vec![line.start, line.end]])
        },
        (ShapeType::PolyLine, Geometry::LineString(line)) => Shape::PolyLine(vec![line.0.clone()]),
        (ShapeType::PolyLine, Geometry::MultiLineString(lines)) => Shape::PolyLine(
            lines
                .0
                .iter()
                .filter(|line| !line.0.is_empty())
                .map(|line| line.0.clone())
                .collect(),
        ),
        (ShapeType::Polygon, Geometry::Polygon(polygon)) => Shape::Polygon(polygon_rings(polygon)),
        (ShapeType::Polygon, Geometry::MultiPolygon(polygons)) => {
            Shape::Polygon(polygons.0.iter().flat_map(polygon_rings).collect())
        },
        (ShapeType::Polygon, Geometry::Rect(rect)) => {
            Shape::Polygon(polygon_rings(&rect.to_polygon()))
        },
        (ShapeType::Polygon, Geometry::Triangle(triangle)) => {
            Shape::Polygon(polygon_rings(&triangle.to_polygon()))
        },
        _ => Shape::Null,
    }
}

/// Rings of a polygon, outer ring clockwise and holes counter-clockwise.
fn polygon_rings(polygon: &Polygon) -> Vec<Vec<Coord>> {
    if polygon.exterior().0.is_empty() {
        return Vec::new();
    }
    let mut rings = Vec::with_capacity(1 + polygon.interiors().len());
    rings.push(oriented_ring(polygon.exterior(), true));
    for interior in polygon.interiors() {
        if !interior.0.is_empty() {
            rings.push(oriented_ring(interior, false));
        }
    }
    rings
}

fn oriented_ring(ring: &LineString, clockwise: bool) -> Vec<Coord> {
    let mut coords = ring.0.clone();
    let area = signed_area(&coords);
    if (clockwise && area > 0.0) || (!clockwise && area < 0.0) {
        coords.reverse();
    }
    coords
}

/// Shoelace area; positive for counter-clockwise rings.
fn signed_area(coords: &[Coord]) -> f64 {
    coords
        .windows(2)
        .map(|pair| pair[0].x * pair[1].y - pair[1].x * pair[0].y)
        .sum::<f64>()
        / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{
        GeometryCollection, MultiLineString, MultiPoint, coord, line_string, point, polygon,
    };

    fn square_ccw() -> Polygon {
        polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ]
    }

    #[test]
    fn test_shape_type_codes() {
        assert_eq!(ShapeType::Null.code(), 0);
        assert_eq!(ShapeType::Point.code(), 1);
        assert_eq!(ShapeType::PolyLine.code(), 3);
        assert_eq!(ShapeType::Polygon.code(), 5);
        assert_eq!(ShapeType::MultiPoint.code(), 8);
        assert_eq!(ShapeType::PolyLine.to_string(), "PolyLine");
    }

    #[test]
    fn test_resolve_single_family() {
        let geometries = vec![
            Some(Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)])),
            None,
            Some(Geometry::MultiLineString(MultiLineString(vec![
                line_string![(x: 2.0, y: 2.0), (x: 3.0, y: 3.0)],
            ]))),
        ];
        assert_eq!(resolve_shape_type(&geometries).unwrap(), ShapeType::PolyLine);
    }

    #[test]
    fn test_points_promote_to_multipoint() {
        let only_points = vec![Some(Geometry::Point(point!(x: 1.0, y: 2.0)))];
        assert_eq!(resolve_shape_type(&only_points).unwrap(), ShapeType::Point);

        let mixed = vec![
            Some(Geometry::Point(point!(x: 1.0, y: 2.0))),
            Some(Geometry::MultiPoint(MultiPoint(vec![point!(x: 3.0, y: 4.0)]))),
        ];
        assert_eq!(resolve_shape_type(&mixed).unwrap(), ShapeType::MultiPoint);
    }

    #[test]
    fn test_mixed_families_fail() {
        let geometries = vec![
            Some(Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)])),
            Some(Geometry::Polygon(square_ccw())),
        ];
        let err = resolve_shape_type(&geometries).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Mixed geometry types: PolyLine and Polygon (row 2)"
        );
    }

    #[test]
    fn test_geometry_collection_is_unsupported() {
        let geometries = vec![Some(Geometry::GeometryCollection(GeometryCollection(vec![
            Geometry::Point(point!(x: 1.0, y: 1.0)),
        ])))];
        let err = resolve_shape_type(&geometries).unwrap_err();
        assert!(matches!(
            err,
            SpatialWriteError::UnsupportedGeometryType { row: 1, .. }
        ));
    }

    #[test]
    fn test_all_null_or_empty_is_null_type() {
        let geometries = vec![
            None,
            Some(Geometry::LineString(LineString(vec![]))),
            Some(Geometry::Point(point!(x: f64::NAN, y: f64::NAN))),
        ];
        assert_eq!(resolve_shape_type(&geometries).unwrap(), ShapeType::Null);
        assert_eq!(resolve_shape_type(&[]).unwrap(), ShapeType::Null);
    }

    #[test]
    fn test_empty_geometry_is_null_shape() {
        let empty = Geometry::MultiPoint(MultiPoint(vec![]));
        assert_eq!(to_shape(Some(&empty), ShapeType::MultiPoint), Shape::Null);
        assert_eq!(to_shape(None, ShapeType::Polygon), Shape::Null);
    }

    #[test]
    fn test_point_in_multipoint_file() {
        let point = Geometry::Point(point!(x: 1.0, y: 2.0));
        assert_eq!(
            to_shape(Some(&point), ShapeType::MultiPoint),
            Shape::MultiPoint(vec![coord! { x: 1.0, y: 2.0 }])
        );
    }

    #[test]
    fn test_polygon_rings_are_reoriented() {
        let hole_cw = LineString::from(vec![
            (2.0, 2.0),
            (2.0, 4.0),
            (4.0, 4.0),
            (4.0, 2.0),
            (2.0, 2.0),
        ]);
        let polygon = Polygon::new(square_ccw().exterior().clone(), vec![hole_cw]);

        let Shape::Polygon(rings) = to_shape(Some(&Geometry::Polygon(polygon)), ShapeType::Polygon)
        else {
            panic!("expected a polygon shape");
        };
        assert_eq!(rings.len(), 2);
        assert!(signed_area(&rings[0]) < 0.0, "outer ring must be clockwise");
        assert!(signed_area(&rings[1]) > 0.0, "hole must be counter-clockwise");
        assert!((signed_area(&rings[0]) + 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_point_encoding() {
        let shape = Shape::Point(coord! { x: 1.5, y: -2.0 });
        let mut buf = BytesMut::new();
        shape.encode(&mut buf);

        assert_eq!(buf.len(), shape.content_len());
        assert_eq!(&buf[0..4], &1i32.to_le_bytes());
        assert_eq!(&buf[4..12], &1.5f64.to_le_bytes());
        assert_eq!(&buf[12..20], &(-2.0f64).to_le_bytes());
    }

    #[test]
    fn test_polyline_encoding() {
        let shape = Shape::PolyLine(vec![
            vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 }],
            vec![
                coord! { x: 5.0, y: 5.0 },
                coord! { x: 6.0, y: 4.0 },
                coord! { x: 7.0, y: 9.0 },
            ],
        ]);
        let mut buf = BytesMut::new();
        shape.encode(&mut buf);

        assert_eq!(buf.len(), 44 + 4 * 2 + 16 * 5);
        assert_eq!(buf.len(), shape.content_len());
        assert_eq!(&buf[0..4], &3i32.to_le_bytes());
        // bbox
        assert_eq!(&buf[4..12], &0.0f64.to_le_bytes());
        assert_eq!(&buf[28..36], &9.0f64.to_le_bytes());
        // part and point counts, then part offsets
        assert_eq!(&buf[36..40], &2i32.to_le_bytes());
        assert_eq!(&buf[40..44], &5i32.to_le_bytes());
        assert_eq!(&buf[44..48], &0i32.to_le_bytes());
        assert_eq!(&buf[48..52], &2i32.to_le_bytes());
    }

    #[test]
    fn test_null_encoding() {
        let mut buf = BytesMut::new();
        Shape::Null.encode(&mut buf);
        assert_eq!(buf.as_ref(), &0i32.to_le_bytes());
        assert!(Shape::Null.bbox().is_none());
    }

    #[test]
    fn test_bounding_box_extend() {
        let mut bbox = BoundingBox::from_coords(&[coord! { x: 0.0, y: 0.0 }]).unwrap();
        bbox.extend(&BoundingBox::from_coords(&[coord! { x: -3.0, y: 8.0 }]).unwrap());
        assert_eq!(bbox.min_x, -3.0);
        assert_eq!(bbox.max_y, 8.0);
        assert_eq!(bbox.max_x, 0.0);
    }
}
