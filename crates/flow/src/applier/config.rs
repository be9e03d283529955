//! Applier configuration

use super::ProgressSink;
use hubflow_core::io::DriverSpec;
use hubflow_core::{BlockSize, Grid, Result};
use hubflow_parallel::ProcessingMode;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Options of an [`Applier`](super::Applier)
#[derive(Clone, Default)]
pub struct ApplierConfig {
    /// Processing grid; overrides the applier's default grid
    pub grid: Option<Grid>,
    /// Tile size in pixels
    pub block_size: BlockSize,
    /// Driver and creation options per output name; outputs not listed
    /// get the driver implied by their filename
    pub output_drivers: HashMap<String, DriverSpec>,
    /// Replace existing output datasets
    pub overwrite: bool,
    pub processing: ProcessingMode,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl fmt::Debug for ApplierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplierConfig")
            .field("grid", &self.grid)
            .field("block_size", &self.block_size)
            .field("output_drivers", &self.output_drivers)
            .field("overwrite", &self.overwrite)
            .field("processing", &self.processing)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl ApplierConfig {
    pub fn with_grid(mut self, grid: Grid) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn with_block_size(mut self, block_size: BlockSize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_output_driver(mut self, name: impl Into<String>, spec: DriverSpec) -> Self {
        self.output_drivers.insert(name.into(), spec);
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_processing(mut self, processing: ProcessingMode) -> Self {
        self.processing = processing;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.block_size.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApplierConfig::default();
        assert_eq!(config.block_size, BlockSize::new(256, 256));
        assert!(!config.overwrite);
        assert_eq!(config.processing, ProcessingMode::Sequential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let config = ApplierConfig::default().with_block_size(BlockSize::new(0, 10));
        assert!(config.validate().is_err());
    }
}
