//! End-to-end runs of the concrete operators

use approx::assert_relative_eq;
use geo_types::{polygon, Geometry};
use hubflow::class_definition::ENVI_DOMAIN;
use hubflow::objects::{ClassificationParams, VectorClassificationParams, VectorParams};
use hubflow::operators::{MaskFromRasterParams, MaskValue, CLASSIFICATION};
use hubflow::prelude::*;
use ndarray::{array, Array2, Array3};
use std::collections::BTreeMap;
use std::sync::Arc;

fn grid(rows: usize, cols: usize, res: f64) -> Grid {
    Grid::from_origin(
        0.0,
        rows as f64 * res,
        Resolution::square(res),
        cols,
        rows,
        Projection::from_epsg(32633),
    )
    .unwrap()
}

fn read(storage: &Storage, filename: &str, band: usize) -> Array2<f64> {
    let ds = storage.open_raster(filename).unwrap();
    let (rows, cols) = ds.grid().shape();
    ds.read_band_window(band, PixelWindow::full(rows, cols)).unwrap()
}

fn counting_raster(storage: &Storage) -> Raster {
    let band = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c + 1) as f64);
    let raster = MemRaster::from_band(grid(4, 4, 1.0), band)
        .unwrap()
        .with_no_data_value(Some(16.0));
    storage.insert_raster("/vsimem/counting", raster).unwrap();
    Raster::new("/vsimem/counting")
}

fn range_params() -> MaskFromRasterParams {
    MaskFromRasterParams {
        true_values: vec![MaskValue::Range(1.0, 16.0)],
        ..MaskFromRasterParams::default()
    }
}

#[test]
fn mask_from_raster_drops_no_data() {
    let storage = Storage::shared();
    let raster = counting_raster(&storage);
    let config = ApplierConfig::default().with_block_size(BlockSize::new(3, 3));
    let mask = Mask::from_raster(&storage, "/vsimem/mask", &raster, range_params(), config).unwrap();

    let values = read(&storage, &mask.filename, 0);
    let mut expected = Array2::<f64>::ones((4, 4));
    expected[(3, 3)] = 0.0;
    assert_eq!(values, expected);
    let ds = storage.open_raster(&mask.filename).unwrap();
    assert_eq!(ds.data_type(), DataType::U8);
    assert_eq!(ds.no_data_values(), vec![Some(0.0)]);
}

#[test]
fn mask_from_raster_false_values_win() {
    let storage = Storage::shared();
    let raster = counting_raster(&storage);
    let params = MaskFromRasterParams {
        false_values: vec![MaskValue::Value(6.0)],
        ..range_params()
    };
    let mask = Mask::from_raster(&storage, "/vsimem/mask", &raster, params, ApplierConfig::default()).unwrap();
    let values = read(&storage, &mask.filename, 0);
    assert_eq!(values[(1, 1)], 0.0);
    assert_eq!(values[(1, 2)], 1.0);
}

#[test]
fn mask_written_to_geotiff() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mask.tif");
    let filename = path.to_str().unwrap();
    let storage = Storage::shared();
    let raster = counting_raster(&storage);

    Mask::from_raster(&storage, filename, &raster, range_params(), ApplierConfig::default()).unwrap();
    assert!(path.is_file());

    let reopened = Storage::shared();
    let values = read(&reopened, filename, 0);
    assert_eq!(values[(0, 0)], 1.0);
    assert_eq!(values[(3, 3)], 0.0);
    assert!(reopened.open_raster(filename).unwrap().grid().equal(&grid(4, 4, 1.0)));

    // a second run refuses to replace the file unless asked to
    let again = Mask::from_raster(&storage, filename, &raster, range_params(), ApplierConfig::default());
    assert!(matches!(again, Err(Error::OutputExists(_))));
    let config = ApplierConfig::default().with_overwrite(true);
    assert!(Mask::from_raster(&storage, filename, &raster, range_params(), config).is_ok());
}

/// Returns the class fractions of the tile
struct ReadFractions;

impl Operator for ReadFractions {
    type Block = Array3<f64>;

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> hubflow_core::Result<Array3<f64>> {
        ctx.flow_fraction_array(CLASSIFICATION, 0)
    }
}

fn class_one_layer(storage: &Storage, xmax: f64) {
    let square = polygon![
        (x: 0.0, y: 0.0),
        (x: xmax, y: 0.0),
        (x: xmax, y: 3.0),
        (x: 0.0, y: 3.0),
        (x: 0.0, y: 0.0),
    ];
    let feature = Feature::new(Geometry::Polygon(square)).with_property("class", 1.0);
    let layer = MemVector::new("classes", Projection::from_epsg(32633), vec![feature]);
    storage.insert_vector("/vsimem/classes", layer).unwrap();
}

fn vector_fractions(storage: Arc<Storage>, params: VectorClassificationParams) -> Array3<f64> {
    let definition = ClassDefinition::from_classes(2).unwrap();
    let classification = VectorClassification::new("/vsimem/classes", "class", definition).with_params(params);
    let mut applier = Applier::new(storage, grid(3, 3, 1.0), ApplierConfig::default()).unwrap();
    applier.set_flow_classification(CLASSIFICATION, classification).unwrap();
    applier.apply(&ReadFractions).unwrap().remove(0)
}

#[test]
fn absent_vector_class_has_zero_fraction() {
    let storage = Storage::shared();
    class_one_layer(&storage, 3.0);
    let fractions = vector_fractions(storage, VectorClassificationParams::default());
    assert_eq!(fractions.dim(), (2, 3, 3));
    assert!(fractions.index_axis(ndarray::Axis(0), 0).iter().all(|&v| v == 1.0));
    assert!(fractions.index_axis(ndarray::Axis(0), 1).iter().all(|&v| v == 0.0));
}

#[test]
fn vector_class_fraction_is_partial_coverage() {
    let storage = Storage::shared();
    // the last column is half covered at 2x oversampling
    class_one_layer(&storage, 2.6);
    let params = VectorClassificationParams {
        min_overall_coverage: 0.4,
        min_dominant_coverage: 0.4,
        oversampling: 2,
    };
    let fractions = vector_fractions(storage, params);
    for row in 0..3 {
        assert_relative_eq!(fractions[(0, row, 0)], 1.0);
        assert_relative_eq!(fractions[(0, row, 2)], 0.5);
        assert_relative_eq!(fractions[(1, row, 2)], 0.0);
    }
}

fn fine_classification(storage: &Storage) {
    let labels = array![[1u8, 1, 1], [1, 1, 1], [2, 2, 2]];
    let raster = MemRaster::from_band(grid(3, 3, 10.0), labels)
        .unwrap()
        .with_no_data_value(Some(0.0));
    storage.insert_raster("/vsimem/landcover", raster).unwrap();
}

fn resample_to_30m(storage: &Arc<Storage>, min_dominant_coverage: f64) -> f64 {
    let params = ClassificationParams {
        min_overall_coverage: 0.5,
        min_dominant_coverage,
    };
    let definition = ClassDefinition::from_classes(3).unwrap();
    let classification = Classification::new("/vsimem/landcover", definition).with_params(params);
    let config = ApplierConfig::default().with_overwrite(true);
    let out = classification
        .resample(storage, "/vsimem/landcover30", &grid(1, 1, 30.0), config)
        .unwrap();
    read(storage, &out.filename, 0)[(0, 0)]
}

#[test]
fn classification_resample_applies_dominant_coverage() {
    let storage = Storage::shared();
    fine_classification(&storage);
    assert_eq!(resample_to_30m(&storage, 0.5), 1.0);
    assert_eq!(resample_to_30m(&storage, 0.7), 0.0);

    let ds = storage.open_raster("/vsimem/landcover30").unwrap();
    assert_eq!(ds.no_data_values(), vec![Some(0.0)]);
    let recovered = ClassDefinition::from_metadata(ds.metadata()).unwrap();
    assert_eq!(recovered.classes(), 3);
}

#[test]
fn fraction_and_classification_convert_both_ways() {
    let storage = Storage::shared();
    fine_classification(&storage);
    let definition = ClassDefinition::from_classes(2).unwrap();
    let classification = Classification::new("/vsimem/landcover", definition);
    let fraction = Fraction::from_classification(
        &storage,
        "/vsimem/fraction",
        classification,
        &grid(1, 1, 30.0),
        ApplierConfig::default(),
    )
    .unwrap();
    assert_relative_eq!(read(&storage, &fraction.filename, 0)[(0, 0)], 2.0 / 3.0, epsilon = 1e-6);
    assert_relative_eq!(read(&storage, &fraction.filename, 1)[(0, 0)], 1.0 / 3.0, epsilon = 1e-6);

    let labels = Classification::from_fraction(&storage, "/vsimem/labels", &fraction, ApplierConfig::default()).unwrap();
    assert_eq!(read(&storage, &labels.filename, 0)[(0, 0)], 1.0);
}

#[test]
fn reclassify_and_count() {
    let storage = Storage::shared();
    fine_classification(&storage);
    let source = Classification::new("/vsimem/landcover", ClassDefinition::from_classes(2).unwrap());
    let target = ClassDefinition::from_names(vec!["all".to_string()]).unwrap();
    let merged = source
        .reclassify(
            &storage,
            "/vsimem/merged",
            target,
            BTreeMap::from([(1, 1), (2, 1)]),
            ApplierConfig::default(),
        )
        .unwrap();
    let counts = merged.statistics(&storage, None, ApplierConfig::default()).unwrap();
    assert_eq!(counts, vec![0u64, 9]);

    let counts = source.statistics(&storage, None, ApplierConfig::default()).unwrap();
    assert_eq!(counts, vec![0u64, 6, 3]);
}

#[test]
fn performance_against_itself_is_perfect() {
    let storage = Storage::shared();
    fine_classification(&storage);
    let classification = Classification::new("/vsimem/landcover", ClassDefinition::from_classes(2).unwrap());
    let report = classification
        .performance(
            &storage,
            classification.clone(),
            &grid(3, 3, 10.0),
            None,
            ApplierConfig::default(),
        )
        .unwrap();
    assert_eq!(report.samples(), 9);
    assert_eq!(report.confusion_matrix, array![[6u64, 0], [0, 3]]);
    assert_relative_eq!(report.overall_accuracy(), 1.0);
    assert_relative_eq!(report.kappa(), 1.0);
}

#[test]
fn statistics_inside_vector_mask() {
    let storage = Storage::shared();
    let raster = counting_raster(&storage);
    // left half of the 4x4 grid
    let square = polygon![
        (x: 0.0, y: 0.0),
        (x: 2.0, y: 0.0),
        (x: 2.0, y: 4.0),
        (x: 0.0, y: 4.0),
        (x: 0.0, y: 0.0),
    ];
    let layer = MemVector::new("aoi", Projection::from_epsg(32633), vec![Feature::new(Geometry::Polygon(square))]);
    storage.insert_vector("/vsimem/aoi", layer).unwrap();

    let inside = raster
        .statistics(&storage, Some(VectorMask::new("/vsimem/aoi", false).into()), ApplierConfig::default())
        .unwrap();
    // 1 2 / 5 6 / 9 10 / 13 14
    assert_eq!(inside[0].count, 8);
    assert_relative_eq!(inside[0].mean, 7.5);

    let outside = raster
        .statistics(&storage, Some(VectorMask::new("/vsimem/aoi", true).into()), ApplierConfig::default())
        .unwrap();
    // 3 4 / 7 8 / 11 12 / 15, 16 is no data
    assert_eq!(outside[0].count, 7);
    assert_relative_eq!(outside[0].max, 15.0);
}

#[test]
fn regression_pixels_need_every_band() {
    let storage = Storage::shared();
    let mut data = Array3::<f32>::from_elem((2, 2, 2), 4.0);
    data[(1, 0, 0)] = -9999.0;
    data[(1, 0, 1)] = -9999.0;
    let raster = MemRaster::from_array(grid(2, 2, 1.0), data)
        .unwrap()
        .with_no_data_values(&[Some(-9999.0), Some(-9999.0)]);
    storage.insert_raster("/vsimem/targets", raster).unwrap();

    let resampled = Raster::new("/vsimem/targets")
        .with_resample_alg(ResampleAlg::Average)
        .resample(&storage, "/vsimem/coarse", &grid(1, 1, 2.0), ApplierConfig::default())
        .unwrap();
    // plain rasters average the valid pixels of each band
    assert_relative_eq!(read(&storage, &resampled.filename, 1)[(0, 0)], 4.0);

    struct ReadTargets;
    impl Operator for ReadTargets {
        type Block = Array3<f64>;

        fn ufunc(&self, ctx: &mut TileContext<'_>) -> hubflow_core::Result<Array3<f64>> {
            ctx.flow_regression_array("targets", 0)
        }
    }

    let mut applier = Applier::new(Arc::clone(&storage), grid(1, 1, 2.0), ApplierConfig::default()).unwrap();
    applier
        .set_flow_regression("targets", Regression::new("/vsimem/targets"))
        .unwrap();
    let targets = applier.apply(&ReadTargets).unwrap().remove(0);
    // band 2 covers only half of the pixel, so both bands are no data
    assert_eq!(targets[(0, 0, 0)], -9999.0);
    assert_eq!(targets[(1, 0, 0)], -9999.0);
}

/// Burns the vector input into a described output band
struct BurnLayer;

impl Operator for BurnLayer {
    type Block = ();

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> hubflow_core::Result<()> {
        let burned = ctx.flow_vector_array("layer", 0)?;
        ctx.set_output_array("burned", burned.view(), DataType::U8, 0)?;
        ctx.set_flow_metadata_band_names("burned", &["inside".to_string()])?;
        ctx.set_flow_metadata_sensor_definition("burned", &[550.0], Some(&[10.0]))
    }
}

#[test]
fn vector_burned_into_compressed_geotiff() {
    let storage = Storage::shared();
    let square = polygon![
        (x: 0.0, y: 0.0),
        (x: 2.0, y: 0.0),
        (x: 2.0, y: 4.0),
        (x: 0.0, y: 4.0),
        (x: 0.0, y: 0.0),
    ];
    let feature = Feature::new(Geometry::Polygon(square)).with_property("id", 7.0);
    let layer = MemVector::new("aoi", Projection::from_epsg(32633), vec![feature]);
    storage.insert_vector("/vsimem/aoi", layer).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("burned.tif");
    let filename = path.to_str().unwrap();
    let config = ApplierConfig::default()
        .with_block_size(BlockSize::new(3, 3))
        .with_output_driver("burned", DriverSpec::new(Driver::GTiff).with_option("COMPRESS=DEFLATE"));
    let mut applier = Applier::new(Arc::clone(&storage), grid(4, 4, 1.0), config).unwrap();
    let params = VectorParams {
        burn_attribute: Some("id".to_string()),
        ..VectorParams::default()
    };
    applier
        .set_flow_vector("layer", Vector::with_params("/vsimem/aoi", params))
        .unwrap();
    applier.set_output_raster("burned", filename).unwrap();
    applier.apply(&BurnLayer).unwrap();

    let reopened = Storage::shared();
    let values = read(&reopened, filename, 0);
    assert_eq!(values.row(0).to_vec(), vec![7.0, 7.0, 0.0, 0.0]);
    assert_eq!(values.row(3).to_vec(), vec![7.0, 7.0, 0.0, 0.0]);
    let ds = reopened.open_raster(filename).unwrap();
    let metadata = ds.metadata();
    assert_eq!(metadata.bands[0].description.as_deref(), Some("inside"));
    assert_eq!(metadata.item("wavelength units", ENVI_DOMAIN), Some("Nanometers"));
    assert!(metadata.item("fwhm", ENVI_DOMAIN).is_some());
}
