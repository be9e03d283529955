//! # hubflow
//!
//! Tiled raster processing with typed flow objects.
//!
//! An [`Applier`] splits a processing grid into tiles, hands each tile to an
//! [`Operator`] through a [`TileContext`], and writes the results block by
//! block into the registered outputs. Inputs are flow objects (rasters,
//! masks, classifications, fractions, regressions, vectors) that are resolved
//! onto the tile grid on read: resampled, rasterized, aggregated to class
//! fractions, or reduced to masks, with the coverage policy of
//! [`resolve`] deciding which pixels are kept.
//!
//! ```no_run
//! use hubflow::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> hubflow_core::Result<()> {
//! let storage = Storage::shared();
//! let raster = Raster::new("/vsimem/image.tif");
//! let mask = Mask::from_raster(
//!     &storage,
//!     "/vsimem/mask.tif",
//!     &raster,
//!     MaskFromRasterParams::default(),
//!     ApplierConfig::default(),
//! )?;
//! let stats = raster.statistics(&storage, Some(mask.into()), ApplierConfig::default())?;
//! # let _ = (stats, Arc::clone(&storage));
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod class_definition;
pub mod estimator;
mod metadata;
pub mod objects;
pub mod operators;
pub mod resolve;

pub use applier::{
    Aggregate, Applier, ApplierConfig, CancelFlag, Operator, ProcessingMode, ProgressSink, TileContext,
};
pub use class_definition::ClassDefinition;
pub use estimator::{Estimator, MinimumDistance};
pub use objects::{
    Classification, FlowKind, FlowObject, Fraction, Mask, MaskAggregation, Raster, RasterStack, Regression,
    Vector, VectorClassification, VectorMask,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::applier::{
        Aggregate, Applier, ApplierConfig, CancelFlag, Operator, ProcessingMode, ProgressSink, TileContext,
    };
    pub use crate::class_definition::ClassDefinition;
    pub use crate::estimator::{Estimator, MinimumDistance};
    pub use crate::objects::*;
    pub use crate::operators::{MaskFromRasterParams, MaskValue, PredictTarget};
    pub use hubflow_core::prelude::*;
}
