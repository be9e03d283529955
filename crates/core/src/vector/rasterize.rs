//! Burning vector features into a grid

use super::{FeatureFilter, VectorDataset};
use crate::error::{Error, Result};
use crate::grid::{Extent, Grid, SPATIAL_TOLERANCE};
use geo::{BoundingRect, Contains, Intersects};
use geo_types::{coord, Geometry, Point, Rect};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// How features are burned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterizeOptions {
    /// Value of pixels no feature touches
    pub init_value: f64,
    /// Value burned when no burn attribute is given
    pub burn_value: f64,
    /// Numeric attribute providing the burn value per feature
    pub burn_attribute: Option<String>,
    /// Burn every pixel a polygon touches, not only those whose center is inside
    pub all_touched: bool,
    pub filter: Option<FeatureFilter>,
}

impl Default for RasterizeOptions {
    fn default() -> Self {
        Self {
            init_value: 0.0,
            burn_value: 1.0,
            burn_attribute: None,
            all_touched: false,
            filter: None,
        }
    }
}

fn is_areal(geometry: &Geometry<f64>) -> bool {
    matches!(
        geometry,
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_) | Geometry::Triangle(_)
    )
}

fn contains_center(geometry: &Geometry<f64>, center: &Point<f64>) -> bool {
    match geometry {
        Geometry::Polygon(p) => p.contains(center),
        Geometry::MultiPolygon(mp) => mp.contains(center),
        Geometry::Rect(r) => r.to_polygon().contains(center),
        Geometry::Triangle(t) => t.to_polygon().contains(center),
        _ => false,
    }
}

/// Rasterize `layer` into `grid`.
///
/// Polygons burn the pixels whose center lies inside them (every touched
/// pixel with `all_touched`); points and lines always burn every pixel they
/// touch. Later features overwrite earlier ones.
pub fn rasterize<V: VectorDataset + ?Sized>(layer: &V, grid: &Grid, options: &RasterizeOptions) -> Result<Array2<f64>> {
    grid.extent().check_projection(layer.projection())?;
    if let Some(attribute) = &options.burn_attribute {
        layer.check_field(attribute)?;
    }
    if let Some(filter) = &options.filter {
        layer.check_field(filter.attribute())?;
    }

    let (rows, cols) = grid.shape();
    let mut out = Array2::from_elem((rows, cols), options.init_value);
    let res = grid.resolution();
    let xmin = grid.extent().xmin;
    let ymax = grid.extent().ymax;
    // shrink touched-pixel boxes so shared edges do not count as touching
    let eps_x = SPATIAL_TOLERANCE * res.x;
    let eps_y = SPATIAL_TOLERANCE * res.y;

    let selected = layer
        .features()
        .iter()
        .filter(|f| options.filter.as_ref().map_or(true, |filter| filter.matches(f)));
    for feature in selected {
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        let value = match &options.burn_attribute {
            None => options.burn_value,
            Some(attribute) => match feature.property(attribute) {
                None => continue,
                Some(v) if *v == super::AttributeValue::Null => continue,
                Some(v) => v.as_f64().ok_or_else(|| {
                    Error::dataset(format!(
                        "attribute '{}' of layer '{}' is not numeric: {:?}",
                        attribute,
                        layer.layer_name(),
                        v
                    ))
                })?,
            },
        };
        let Some(bounds) = geometry.bounding_rect() else {
            continue;
        };
        let bounds = Extent {
            xmin: bounds.min().x - eps_x,
            xmax: bounds.max().x + eps_x,
            ymin: bounds.min().y - eps_y,
            ymax: bounds.max().y + eps_y,
            projection: grid.projection().clone(),
        };
        if !bounds.intersects(grid.extent()) {
            continue;
        }
        let Some(window) = grid.window_covering(&bounds).clip(rows, cols) else {
            continue;
        };
        let by_center = is_areal(geometry) && !options.all_touched;
        for row in window.row_off as usize..window.row_end() as usize {
            let top = ymax - row as f64 * res.y;
            for col in window.col_off as usize..window.col_end() as usize {
                let left = xmin + col as f64 * res.x;
                let hit = if by_center {
                    contains_center(geometry, &Point::new(left + res.x / 2.0, top - res.y / 2.0))
                } else {
                    let pixel = Rect::new(
                        coord! { x: left + eps_x, y: top - res.y + eps_y },
                        coord! { x: left + res.x - eps_x, y: top - eps_y },
                    );
                    geometry.intersects(&pixel)
                };
                if hit {
                    out[(row, col)] = value;
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Projection;
    use crate::grid::Resolution;
    use crate::vector::{Feature, MemVector};
    use geo_types::{line_string, polygon};

    fn grid() -> Grid {
        Grid::from_origin(0.0, 4.0, Resolution::square(1.0), 4, 4, Projection::from_epsg(32633)).unwrap()
    }

    fn layer() -> MemVector {
        MemVector::new(
            "parcels",
            Projection::from_epsg(32633),
            vec![
                // covers the centers of columns 0..2, rows 2..4 (lower left quarter) and touches column 2
                Feature::new(Geometry::Polygon(polygon![
                    (x: 0.0, y: 0.0), (x: 2.2, y: 0.0), (x: 2.2, y: 2.0), (x: 0.0, y: 2.0)
                ]))
                .with_property("class", 1i64),
                Feature::new(Geometry::Polygon(polygon![
                    (x: 1.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 1.0), (x: 1.0, y: 1.0)
                ]))
                .with_property("class", 2i64),
            ],
        )
    }

    #[test]
    fn test_burn_by_center_last_wins() {
        let options = RasterizeOptions {
            burn_attribute: Some("class".into()),
            ..Default::default()
        };
        let out = layer().rasterize(&grid(), &options).unwrap();
        assert_eq!(out.row(2).to_vec(), vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(out.row(3).to_vec(), vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(out.row(0).sum(), 0.0);
    }

    #[test]
    fn test_all_touched() {
        let options = RasterizeOptions {
            all_touched: true,
            filter: Some(FeatureFilter::equals("class", 1i64)),
            ..Default::default()
        };
        let out = layer().rasterize(&grid(), &options).unwrap();
        assert_eq!(out.row(2).to_vec(), vec![1.0, 1.0, 1.0, 0.0]);
        assert_eq!(out.row(1).sum(), 0.0);
    }

    #[test]
    fn test_lines_touch() {
        let layer = MemVector::new(
            "roads",
            Projection::from_epsg(32633),
            vec![Feature::new(Geometry::LineString(line_string![(x: 0.5, y: 3.5), (x: 3.5, y: 3.5)]))],
        );
        let out = layer.rasterize(&grid(), &RasterizeOptions::default()).unwrap();
        assert_eq!(out.row(0).to_vec(), vec![1.0; 4]);
        assert_eq!(out.sum(), 4.0);
    }

    #[test]
    fn test_missing_burn_attribute() {
        let options = RasterizeOptions {
            burn_attribute: Some("code".into()),
            ..Default::default()
        };
        assert!(matches!(
            layer().rasterize(&grid(), &options),
            Err(Error::MissingAttribute { .. })
        ));
    }

    #[test]
    fn test_projection_mismatch() {
        let layer = MemVector::new("x", Projection::wgs84(), vec![]);
        assert!(matches!(
            layer.rasterize(&grid(), &RasterizeOptions::default()),
            Err(Error::ProjectionMismatch(..))
        ));
    }
}
