//! Applying estimators to rasters and collecting training samples

use super::{applier_with_masks, profiles, stack_rows, FEATURES, LABELS, MASK, OUTPUT};
use crate::applier::{Aggregate, ApplierConfig, Operator, TileContext};
use crate::class_definition::ClassDefinition;
use crate::estimator::Estimator;
use crate::objects::{Classification, FlowObject, Fraction, Raster, Regression, RegressionParams};
use hubflow_core::io::Storage;
use hubflow_core::raster::resample::is_no_data;
use hubflow_core::{DataType, Error, Grid, Result};
use ndarray::{Array2, Array3, ArrayView3, Axis, Zip};
use std::sync::Arc;

/// What an [`EstimatorPredict`] run writes
#[derive(Debug, Clone, PartialEq)]
pub enum PredictTarget {
    /// Hard labels from `predict`, labels outside the definition become 0
    Classification(ClassDefinition),
    /// Memberships from `predict_proba`, -1 outside the mask
    Fraction(ClassDefinition),
    /// Targets from `predict`
    Regression { no_data_value: f64, output_names: Vec<String> },
    /// `components` columns from `transform`
    Transform { no_data_value: f64, components: usize },
}

impl PredictTarget {
    fn fill(&self) -> f64 {
        match self {
            PredictTarget::Classification(_) => 0.0,
            PredictTarget::Fraction(_) => Fraction::NO_DATA,
            PredictTarget::Regression { no_data_value, .. } | PredictTarget::Transform { no_data_value, .. } => {
                *no_data_value
            }
        }
    }
}

/// Pixels with every band valid and every mask set
fn valid_pixels(ctx: &TileContext<'_>, features: ArrayView3<f64>) -> Result<Array2<bool>> {
    let no_data = ctx.flow_no_data_values(FEATURES)?;
    let mut valid = ctx.flow_mask_array(MASK, 0)?;
    for (b, band) in features.outer_iter().enumerate() {
        let nd = no_data.get(b).copied().flatten();
        Zip::from(&mut valid).and(&band).for_each(|ok, &v| *ok = *ok && !is_no_data(v, nd));
    }
    Ok(valid)
}

/// Scatter per-pixel rows back into a (columns, rows, cols) array
fn scatter(values: &Array2<f64>, valid: &Array2<bool>, fill: f64) -> Array3<f64> {
    let (rows, cols) = valid.dim();
    let mut out = Array3::from_elem((values.ncols(), rows, cols), fill);
    let pixels = valid.indexed_iter().filter(|(_, &v)| v).map(|(index, _)| index);
    for (row, (r, c)) in values.axis_iter(Axis(0)).zip(pixels) {
        for (b, &v) in row.iter().enumerate() {
            out[(b, r, c)] = v;
        }
    }
    out
}

/// Apply a fitted estimator to the [`FEATURES`] profiles of the pixels
/// selected by [`MASK`] and write the prediction to [`OUTPUT`]
#[derive(Debug)]
pub struct EstimatorPredict<'e, E: Estimator + ?Sized> {
    pub estimator: &'e E,
    pub target: PredictTarget,
}

impl<E: Estimator + ?Sized> EstimatorPredict<'_, E> {
    fn predict(&self, x: Array2<f64>) -> Result<Array2<f64>> {
        match &self.target {
            PredictTarget::Classification(definition) => {
                let classes = definition.classes() as f64;
                let mut y = self.estimator.predict(x.view())?;
                y.mapv_inplace(|l| if (1.0..=classes).contains(&l) { l } else { 0.0 });
                Ok(y)
            }
            PredictTarget::Fraction(definition) => {
                let proba = self.estimator.predict_proba(x.view())?;
                let labels = self
                    .estimator
                    .labels()
                    .ok_or_else(|| Error::configuration("estimator has no class labels"))?;
                let mut y = Array2::zeros((proba.nrows(), definition.classes()));
                for (column, &label) in labels.iter().enumerate() {
                    if label >= 1 && (label as usize) <= definition.classes() {
                        y.column_mut(label as usize - 1).assign(&proba.column(column));
                    }
                }
                Ok(y)
            }
            PredictTarget::Regression { .. } => self.estimator.predict(x.view()),
            PredictTarget::Transform { .. } => self.estimator.transform(x.view()),
        }
    }

    fn outputs(&self) -> usize {
        match &self.target {
            PredictTarget::Classification(_) => 1,
            PredictTarget::Fraction(definition) => definition.classes(),
            PredictTarget::Regression { output_names, .. } => output_names.len(),
            PredictTarget::Transform { components, .. } => *components,
        }
    }
}

impl<E: Estimator + ?Sized> Operator for EstimatorPredict<'_, E> {
    type Block = ();

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<()> {
        let features = ctx.flow_raster_array(FEATURES, None, 0)?;
        let valid = valid_pixels(ctx, features.view())?;
        let x = profiles(features.view(), &valid);
        let fill = self.target.fill();
        let out = if x.nrows() == 0 {
            Array3::from_elem((self.outputs(), valid.nrows(), valid.ncols()), fill)
        } else {
            let y = self.predict(x)?;
            if y.ncols() != self.outputs() {
                return Err(Error::configuration(format!(
                    "estimator returned {} column(s), expected {}",
                    y.ncols(),
                    self.outputs()
                )));
            }
            scatter(&y, &valid, fill)
        };
        ctx.check_canceled()?;

        match &self.target {
            PredictTarget::Classification(definition) => {
                ctx.set_output_array(OUTPUT, out.view(), DataType::for_labels(definition.classes()), 0)?;
                ctx.set_flow_metadata_class_definition(OUTPUT, definition)
            }
            PredictTarget::Fraction(definition) => {
                ctx.set_output_array(OUTPUT, out.view(), DataType::F32, 0)?;
                ctx.set_flow_metadata_fraction_definition(OUTPUT, definition)
            }
            PredictTarget::Regression {
                no_data_value,
                output_names,
            } => {
                ctx.set_output_array(OUTPUT, out.view(), DataType::F32, 0)?;
                let no_data = vec![*no_data_value; output_names.len()];
                ctx.set_flow_metadata_regression_definition(OUTPUT, &no_data, output_names)
            }
            PredictTarget::Transform { no_data_value, .. } => {
                ctx.set_output_array(OUTPUT, out.view(), DataType::F32, 0)?;
                ctx.set_output_no_data_value(OUTPUT, Some(*no_data_value), out.dim().0)
            }
        }
    }
}

/// Predict with `estimator` from `features` on `grid`, restricted to `mask`,
/// and return the written map as a flow object.
#[allow(clippy::too_many_arguments)]
pub fn predict<E: Estimator + ?Sized>(
    storage: &Arc<Storage>,
    estimator: &E,
    features: &Raster,
    mask: Option<FlowObject>,
    target: PredictTarget,
    filename: &str,
    grid: &Grid,
    config: ApplierConfig,
) -> Result<FlowObject> {
    let mut applier = applier_with_masks(storage, grid, mask, config)?;
    applier.set_flow_raster(FEATURES, features.clone())?;
    applier.set_output_raster(OUTPUT, filename)?;
    let operator = EstimatorPredict {
        estimator,
        target,
    };
    applier.apply(&operator)?;
    Ok(match operator.target {
        PredictTarget::Classification(definition) => Classification::new(filename, definition).into(),
        PredictTarget::Fraction(definition) => Fraction::new(filename, definition).into(),
        PredictTarget::Regression {
            no_data_value,
            output_names,
        } => {
            let params = RegressionParams {
                no_data_values: Some(vec![no_data_value; output_names.len()]),
                output_names: Some(output_names),
                ..RegressionParams::default()
            };
            Regression::with_params(filename, params).into()
        }
        PredictTarget::Transform { .. } => Raster::new(filename).into(),
    })
}

/// Training sample: `x` is (samples, features), `y` is (samples, targets)
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
}

/// Profiles of [`FEATURES`] and [`LABELS`] at the pixels where both are
/// valid and [`MASK`] is set.
///
/// Categorical labels give one column of class labels (0 = unclassified is
/// skipped); a regression gives its bands (pixels with any no-data band are
/// skipped).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractSample;

impl Operator for ExtractSample {
    type Block = (Array2<f64>, Array2<f64>);

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<(Array2<f64>, Array2<f64>)> {
        let features = ctx.flow_raster_array(FEATURES, None, 0)?;
        let mut valid = valid_pixels(ctx, features.view())?;
        let labels = match ctx.flow_object(LABELS)? {
            FlowObject::Regression(_) => {
                let no_data = ctx.flow_regression_no_data_values(LABELS)?;
                let targets = ctx.flow_regression_array(LABELS, 0)?;
                for (band, &nd) in targets.outer_iter().zip(&no_data) {
                    Zip::from(&mut valid).and(&band).for_each(|ok, &v| *ok = *ok && !is_no_data(v, Some(nd)));
                }
                targets
            }
            _ => {
                let labels = ctx.flow_classification_array(LABELS, 0)?;
                Zip::from(&mut valid).and(&labels).for_each(|ok, &l| *ok = *ok && l != 0);
                labels.mapv(f64::from).insert_axis(Axis(0))
            }
        };
        Ok((profiles(features.view(), &valid), profiles(labels.view(), &valid)))
    }
}

impl Aggregate for ExtractSample {
    type Output = Sample;

    fn aggregate(&self, blocks: Vec<(Array2<f64>, Array2<f64>)>, _grid: &Grid) -> Result<Sample> {
        let features = blocks.first().map(|(x, _)| x.ncols()).unwrap_or(0);
        let targets = blocks.first().map(|(_, y)| y.ncols()).unwrap_or(0);
        let (xs, ys): (Vec<_>, Vec<_>) = blocks.into_iter().unzip();
        Ok(Sample {
            x: stack_rows(xs, features)?,
            y: stack_rows(ys, targets)?,
        })
    }
}

/// Collect a training sample of `features` labeled by `labels` (a
/// classification, vector classification, fraction or regression) on `grid`.
pub fn extract_sample(
    storage: &Arc<Storage>,
    features: &Raster,
    labels: impl Into<FlowObject>,
    mask: Option<FlowObject>,
    grid: &Grid,
    config: ApplierConfig,
) -> Result<Sample> {
    let labels = labels.into();
    let mut applier = applier_with_masks(storage, grid, mask, config)?;
    applier.set_flow_raster(FEATURES, features.clone())?;
    if matches!(labels, FlowObject::Regression(_)) {
        applier.set_flow_regression(LABELS, labels)?;
    } else {
        applier.set_flow_classification(LABELS, labels)?;
    }
    let sample = applier.apply_aggregate(&ExtractSample)?;
    tracing::info!("Extracted {} sample(s) with {} feature(s)", sample.x.nrows(), sample.x.ncols());
    Ok(sample)
}
