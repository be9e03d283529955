//! Classification and fraction operators

use super::{applier_with_masks, native_grid, CLASSIFICATION, FRACTION, MASK, OUTPUT, REFERENCE};
use crate::applier::{Aggregate, Applier, ApplierConfig, Operator, TileContext};
use crate::class_definition::ClassDefinition;
use crate::objects::{Classification, FlowObject, Fraction};
use hubflow_core::io::Storage;
use hubflow_core::{DataType, Error, Grid, Result};
use ndarray::{Array1, Array2, Zip};
use std::collections::BTreeMap;
use std::sync::Arc;

fn write_labels(ctx: &TileContext<'_>, labels: &Array2<u32>, definition: &ClassDefinition) -> Result<()> {
    ctx.set_output_band(OUTPUT, labels, DataType::for_labels(definition.classes()), 0)?;
    ctx.set_flow_metadata_class_definition(OUTPUT, definition)
}

/// [`CLASSIFICATION`] resampled through its class fractions and coverage
/// thresholds onto the processing grid
#[derive(Debug, Clone)]
pub struct ClassificationResample {
    pub class_definition: ClassDefinition,
}

impl Operator for ClassificationResample {
    type Block = ();

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<()> {
        let labels = ctx.flow_classification_array(CLASSIFICATION, 0)?;
        write_labels(ctx, &labels, &self.class_definition)
    }
}

/// Hard labels from the dominant class of [`FRACTION`]
#[derive(Debug, Clone)]
pub struct ClassificationFromFraction {
    pub class_definition: ClassDefinition,
}

impl Operator for ClassificationFromFraction {
    type Block = ();

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<()> {
        let labels = ctx.flow_classification_array(FRACTION, 0)?;
        write_labels(ctx, &labels, &self.class_definition)
    }
}

/// Class fractions of [`CLASSIFICATION`], one `F32` band per class
#[derive(Debug, Clone)]
pub struct FractionFromClassification {
    pub class_definition: ClassDefinition,
}

impl Operator for FractionFromClassification {
    type Block = ();

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<()> {
        let fractions = ctx.flow_fraction_array(CLASSIFICATION, 0)?;
        ctx.set_output_array(OUTPUT, fractions.view(), DataType::F32, 0)?;
        ctx.set_flow_metadata_fraction_definition(OUTPUT, &self.class_definition)
    }
}

/// Relabel [`CLASSIFICATION`]: label `l` becomes `mapping[l]`, unmapped
/// labels become 0
#[derive(Debug, Clone)]
pub struct ClassificationReclassify {
    pub mapping: BTreeMap<u32, u32>,
    pub class_definition: ClassDefinition,
}

impl ClassificationReclassify {
    /// Fails if a target label exceeds the new class count
    pub fn new(mapping: BTreeMap<u32, u32>, class_definition: ClassDefinition) -> Result<Self> {
        if let Some((&from, &to)) = mapping.iter().find(|(_, &to)| to as usize > class_definition.classes()) {
            return Err(Error::InvalidParameter {
                name: "mapping",
                value: format!("{} -> {}", from, to),
                reason: format!("only {} target class(es)", class_definition.classes()),
            });
        }
        Ok(Self {
            mapping,
            class_definition,
        })
    }
}

impl Operator for ClassificationReclassify {
    type Block = ();

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<()> {
        let labels = ctx.flow_classification_array(CLASSIFICATION, 0)?;
        let relabeled = labels.mapv(|l| self.mapping.get(&l).copied().unwrap_or(0));
        write_labels(ctx, &relabeled, &self.class_definition)
    }
}

/// Pixel count per label of [`CLASSIFICATION`] where [`MASK`] is valid;
/// index 0 counts unclassified pixels
#[derive(Debug, Clone, Copy)]
pub struct ClassificationStatistics {
    pub classes: usize,
}

impl Operator for ClassificationStatistics {
    type Block = Vec<u64>;

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<Vec<u64>> {
        let labels = ctx.flow_classification_array(CLASSIFICATION, 0)?;
        let valid = ctx.flow_mask_array(MASK, 0)?;
        let mut counts = vec![0u64; self.classes + 1];
        Zip::from(&labels).and(&valid).for_each(|&l, &ok| {
            if ok {
                if let Some(count) = counts.get_mut(l as usize) {
                    *count += 1;
                }
            }
        });
        Ok(counts)
    }
}

impl Aggregate for ClassificationStatistics {
    type Output = Vec<u64>;

    fn aggregate(&self, blocks: Vec<Vec<u64>>, _grid: &Grid) -> Result<Vec<u64>> {
        Ok(blocks.into_iter().fold(vec![0u64; self.classes + 1], |mut total, block| {
            total.iter_mut().zip(block).for_each(|(t, b)| *t += b);
            total
        }))
    }
}

/// Accuracy assessment of a classification against a reference
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceReport {
    pub class_definition: ClassDefinition,
    /// Pixel counts, rows = reference class, columns = predicted class,
    /// both 1-based labels shifted to 0-based indices
    pub confusion_matrix: Array2<u64>,
}

impl PerformanceReport {
    pub fn samples(&self) -> u64 {
        self.confusion_matrix.sum()
    }

    pub fn overall_accuracy(&self) -> f64 {
        let correct: u64 = self.confusion_matrix.diag().sum();
        correct as f64 / self.samples() as f64
    }

    /// Share of each reference class predicted correctly
    pub fn producer_accuracy(&self) -> Array1<f64> {
        let m = &self.confusion_matrix;
        Array1::from_shape_fn(m.nrows(), |k| m[(k, k)] as f64 / m.row(k).sum() as f64)
    }

    /// Share of each predicted class that is correct
    pub fn user_accuracy(&self) -> Array1<f64> {
        let m = &self.confusion_matrix;
        Array1::from_shape_fn(m.ncols(), |k| m[(k, k)] as f64 / m.column(k).sum() as f64)
    }

    /// Cohen's kappa
    pub fn kappa(&self) -> f64 {
        let m = &self.confusion_matrix;
        let n = self.samples() as f64;
        let observed = self.overall_accuracy();
        let expected: f64 = (0..m.nrows())
            .map(|k| m.row(k).sum() as f64 * m.column(k).sum() as f64)
            .sum::<f64>()
            / (n * n);
        (observed - expected) / (1.0 - expected)
    }
}

/// Confusion matrix of [`CLASSIFICATION`] against [`REFERENCE`] over the
/// pixels where both are classified and [`MASK`] is valid
#[derive(Debug, Clone)]
pub struct ClassificationPerformance {
    pub class_definition: ClassDefinition,
}

impl Operator for ClassificationPerformance {
    type Block = Array2<u64>;

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<Array2<u64>> {
        let predicted = ctx.flow_classification_array(CLASSIFICATION, 0)?;
        let reference = ctx.flow_classification_array(REFERENCE, 0)?;
        let valid = ctx.flow_mask_array(MASK, 0)?;
        let classes = self.class_definition.classes();
        let mut matrix = Array2::<u64>::zeros((classes, classes));
        Zip::from(&predicted)
            .and(&reference)
            .and(&valid)
            .for_each(|&p, &r, &ok| {
                let (p, r) = (p as usize, r as usize);
                if ok && (1..=classes).contains(&p) && (1..=classes).contains(&r) {
                    matrix[(r - 1, p - 1)] += 1;
                }
            });
        Ok(matrix)
    }
}

impl Aggregate for ClassificationPerformance {
    type Output = PerformanceReport;

    fn aggregate(&self, blocks: Vec<Array2<u64>>, _grid: &Grid) -> Result<PerformanceReport> {
        let classes = self.class_definition.classes();
        let confusion_matrix = blocks
            .into_iter()
            .fold(Array2::<u64>::zeros((classes, classes)), |total, block| total + block);
        Ok(PerformanceReport {
            class_definition: self.class_definition.clone(),
            confusion_matrix,
        })
    }
}

impl Classification {
    /// Resample onto `grid` through class fractions and this
    /// classification's coverage thresholds.
    pub fn resample(
        &self,
        storage: &Arc<Storage>,
        filename: &str,
        grid: &Grid,
        config: ApplierConfig,
    ) -> Result<Classification> {
        let mut applier = Applier::new(Arc::clone(storage), grid.clone(), config)?;
        applier.set_flow_classification(CLASSIFICATION, self.clone())?;
        applier.set_output_raster(OUTPUT, filename)?;
        applier.apply(&ClassificationResample {
            class_definition: self.class_definition.clone(),
        })?;
        Ok(Classification::new(filename, self.class_definition.clone()))
    }

    /// Dominant class of `fraction`, on its own grid unless `config`
    /// overrides it.
    pub fn from_fraction(
        storage: &Arc<Storage>,
        filename: &str,
        fraction: &Fraction,
        config: ApplierConfig,
    ) -> Result<Classification> {
        let grid = native_grid(storage, &fraction.filename)?;
        let mut applier = Applier::new(Arc::clone(storage), grid, config)?;
        applier.set_flow_fraction(FRACTION, fraction.clone())?;
        applier.set_output_raster(OUTPUT, filename)?;
        applier.apply(&ClassificationFromFraction {
            class_definition: fraction.class_definition.clone(),
        })?;
        Ok(Classification::new(filename, fraction.class_definition.clone()))
    }

    /// Relabel with `mapping` into the classes of `class_definition`.
    pub fn reclassify(
        &self,
        storage: &Arc<Storage>,
        filename: &str,
        class_definition: ClassDefinition,
        mapping: BTreeMap<u32, u32>,
        config: ApplierConfig,
    ) -> Result<Classification> {
        let operator = ClassificationReclassify::new(mapping, class_definition)?;
        let grid = native_grid(storage, &self.filename)?;
        let mut applier = Applier::new(Arc::clone(storage), grid, config)?;
        applier.set_flow_classification(CLASSIFICATION, self.clone())?;
        applier.set_output_raster(OUTPUT, filename)?;
        applier.apply(&operator)?;
        Ok(Classification::new(filename, operator.class_definition))
    }

    /// Pixel count per label (index 0 = unclassified) inside `mask`.
    pub fn statistics(
        &self,
        storage: &Arc<Storage>,
        mask: Option<FlowObject>,
        config: ApplierConfig,
    ) -> Result<Vec<u64>> {
        let grid = native_grid(storage, &self.filename)?;
        let mut applier = applier_with_masks(storage, &grid, mask, config)?;
        applier.set_flow_classification(CLASSIFICATION, self.clone())?;
        applier.apply_aggregate(&ClassificationStatistics {
            classes: self.class_definition.classes(),
        })
    }

    /// Accuracy against `reference` on `grid`. Both maps must share the
    /// class definition.
    pub fn performance(
        &self,
        storage: &Arc<Storage>,
        reference: impl Into<FlowObject>,
        grid: &Grid,
        mask: Option<FlowObject>,
        config: ApplierConfig,
    ) -> Result<PerformanceReport> {
        let reference = reference.into();
        match reference.class_definition() {
            Some(definition) if definition.equal(&self.class_definition) => {}
            _ => {
                return Err(Error::configuration(format!(
                    "reference '{}' does not share the class definition of '{}'",
                    reference.filename(),
                    self.filename
                )))
            }
        }
        let mut applier = applier_with_masks(storage, grid, mask, config)?;
        applier.set_flow_classification(CLASSIFICATION, self.clone())?;
        applier.set_flow_classification(REFERENCE, reference)?;
        applier.apply_aggregate(&ClassificationPerformance {
            class_definition: self.class_definition.clone(),
        })
    }
}

impl Fraction {
    /// Class fractions of `classification` on `grid`, with the coverage
    /// thresholds of the classification.
    pub fn from_classification(
        storage: &Arc<Storage>,
        filename: &str,
        classification: impl Into<FlowObject>,
        grid: &Grid,
        config: ApplierConfig,
    ) -> Result<Fraction> {
        let classification = classification.into();
        let class_definition = classification
            .class_definition()
            .cloned()
            .ok_or_else(|| Error::configuration(format!("'{}' is not categorical", classification.filename())))?;
        let mut applier = Applier::new(Arc::clone(storage), grid.clone(), config)?;
        applier.set_flow_classification(CLASSIFICATION, classification)?;
        applier.set_output_raster(OUTPUT, filename)?;
        applier.apply(&FractionFromClassification {
            class_definition: class_definition.clone(),
        })?;
        Ok(Fraction::new(filename, class_definition))
    }
}
