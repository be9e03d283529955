//! Tiled execution of operators over registered flow inputs
//!
//! An [`Applier`] holds named inputs (flow objects whose datasets are opened
//! at registration) and named outputs (filenames that receive data lazily,
//! on the first tile that writes them). [`Applier::apply`] visits every tile
//! of the processing grid in row-major order, hands each one to the
//! operator's `ufunc` through a [`TileContext`], and publishes the outputs
//! only after every tile succeeded.

mod config;
mod context;
pub(crate) mod inputs;
mod operator;
mod progress;

pub use config::ApplierConfig;
pub use context::TileContext;
pub use operator::{Aggregate, Operator};
pub use progress::{CancelFlag, ProgressSink};
pub use hubflow_parallel::ProcessingMode;

use crate::objects::{FlowKind, FlowObject};
use hubflow_core::grid::Subgrid;
use hubflow_core::io::{Driver, DriverSpec, RasterMetadata, RasterWriter, Storage};
use hubflow_core::{Error, Grid, Result};
use hubflow_parallel::{available_threads, ParallelStrategy, PoolError};
use inputs::Input;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A registered output sink
#[derive(Debug, Clone)]
struct OutputSpec {
    name: String,
    filename: String,
    spec: DriverSpec,
}

/// Output state of one run; the writer appears on the first write
#[derive(Debug, Default)]
struct OutputState {
    writer: Option<RasterWriter>,
    metadata: RasterMetadata,
}

#[derive(Debug)]
struct OutputSlot {
    spec: OutputSpec,
    state: Mutex<OutputState>,
}

impl OutputSlot {
    fn lock(&self) -> Result<MutexGuard<'_, OutputState>> {
        self.state
            .lock()
            .map_err(|_| Error::dataset(format!("output '{}' lock poisoned", self.spec.name)))
    }
}

/// Outputs of one `apply()` run
#[derive(Debug)]
struct Outputs {
    slots: HashMap<String, OutputSlot>,
}

impl Outputs {
    fn new(specs: &[OutputSpec]) -> Self {
        let slots = specs
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    OutputSlot {
                        spec: spec.clone(),
                        state: Mutex::new(OutputState::default()),
                    },
                )
            })
            .collect();
        Self { slots }
    }

    fn slot(&self, name: &str) -> Result<&OutputSlot> {
        self.slots
            .get(name)
            .ok_or_else(|| Error::configuration(format!("no output raster named '{}'", name)))
    }

    /// Publish every written output, then report the created files.
    ///
    /// All outputs are staged before the first one is published, so a
    /// failing output keeps the others unpublished too. If publishing fails
    /// midway, the outputs published so far are removed again.
    fn finalize(self, storage: &Storage, progress: Option<&dyn ProgressSink>) -> Result<Vec<String>> {
        let mut staged = Vec::new();
        for (name, slot) in self.slots {
            let state = slot
                .state
                .into_inner()
                .map_err(|_| Error::dataset(format!("output '{}' lock poisoned", name)))?;
            let Some(mut writer) = state.writer else {
                warn!("Output '{}' was never written, no file created", name);
                continue;
            };
            writer.merge_metadata(state.metadata)?;
            staged.push(writer.stage()?);
        }
        staged.sort_by(|a, b| a.filename().cmp(b.filename()));

        let mut created: Vec<String> = Vec::new();
        for output in staged {
            let filename = output.filename().to_string();
            if let Err(e) = output.publish(storage) {
                for published in &created {
                    if let Err(cleanup) = storage.remove(published) {
                        warn!("Could not remove {} after a failed run: {}", published, cleanup);
                    }
                }
                return Err(e);
            }
            created.push(filename);
        }
        for filename in &created {
            info!("Created {}", filename);
            if let Some(progress) = progress {
                progress.file_created(filename);
            }
        }
        Ok(created)
    }
}

/// Tile failure carried through the scheduler
struct TileFailure(Error);

impl From<PoolError> for TileFailure {
    fn from(e: PoolError) -> Self {
        TileFailure(Error::configuration(e.to_string()))
    }
}

/// Runs operators tile by tile over named inputs and outputs
#[derive(Debug)]
pub struct Applier {
    storage: Arc<Storage>,
    default_grid: Grid,
    config: ApplierConfig,
    inputs: HashMap<String, Input>,
    masks: HashMap<String, Vec<Input>>,
    outputs: Vec<OutputSpec>,
}

impl Applier {
    pub fn new(storage: Arc<Storage>, default_grid: Grid, config: ApplierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            default_grid,
            config,
            inputs: HashMap::new(),
            masks: HashMap::new(),
            outputs: Vec::new(),
        })
    }

    /// The processing grid: the configured override or the default grid
    pub fn grid(&self) -> &Grid {
        self.config.grid.as_ref().unwrap_or(&self.default_grid)
    }

    pub fn config(&self) -> &ApplierConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Flow object registered under `name`
    pub fn flow_object(&self, name: &str) -> Option<&FlowObject> {
        self.inputs.get(name).map(|input| &input.object)
    }

    /// Register an output. The driver comes from the configured override for
    /// `name`, else from the filename.
    pub fn set_output_raster(&mut self, name: &str, filename: &str) -> Result<()> {
        let spec = match self.config.output_drivers.get(name) {
            Some(spec) => spec.clone(),
            None => DriverSpec::new(Driver::from_filename(filename)?),
        };
        spec.compression()?;
        if !self.config.overwrite && self.storage.exists(filename) {
            return Err(Error::OutputExists(filename.to_string()));
        }
        self.outputs.retain(|output| output.name != name);
        self.outputs.push(OutputSpec {
            name: name.to_string(),
            filename: filename.to_string(),
            spec,
        });
        Ok(())
    }

    /// Register any flow object as input `name`.
    pub fn set_flow_input(&mut self, name: &str, object: impl Into<FlowObject>) -> Result<()> {
        let input = inputs::open(&self.storage, name, object.into())?;
        debug!("Registered input '{}' ({})", name, input.object.kind());
        self.inputs.insert(name.to_string(), input);
        Ok(())
    }

    fn set_checked(&mut self, name: &str, object: FlowObject, role: &str, accepted: fn(FlowKind) -> bool) -> Result<()> {
        if !accepted(object.kind()) {
            return Err(Error::configuration(format!(
                "input '{}': a {} cannot be used as {}",
                name,
                object.kind(),
                role
            )));
        }
        self.set_flow_input(name, object)
    }

    pub fn set_flow_raster(&mut self, name: &str, raster: impl Into<FlowObject>) -> Result<()> {
        let object = raster.into();
        self.set_checked(name, object, "a raster", |kind| {
            !matches!(kind, FlowKind::Vector | FlowKind::VectorMask | FlowKind::VectorClassification)
        })
    }

    pub fn set_flow_vector(&mut self, name: &str, vector: impl Into<FlowObject>) -> Result<()> {
        self.set_checked(name, vector.into(), "a vector", |kind| {
            matches!(kind, FlowKind::Vector | FlowKind::VectorMask | FlowKind::VectorClassification)
        })
    }

    pub fn set_flow_classification(&mut self, name: &str, classification: impl Into<FlowObject>) -> Result<()> {
        self.set_checked(name, classification.into(), "a classification", is_categorical)
    }

    pub fn set_flow_fraction(&mut self, name: &str, fraction: impl Into<FlowObject>) -> Result<()> {
        self.set_checked(name, fraction.into(), "a fraction", is_categorical)
    }

    pub fn set_flow_regression(&mut self, name: &str, regression: impl Into<FlowObject>) -> Result<()> {
        self.set_checked(name, regression.into(), "a regression", |kind| kind == FlowKind::Regression)
    }

    /// Register a single mask under `name`.
    pub fn set_flow_mask(&mut self, name: &str, mask: impl Into<FlowObject>) -> Result<()> {
        self.set_flow_masks(name, vec![mask.into()])
    }

    /// Register masks under `name`; they are combined with a logical and.
    /// No masks means nothing is masked.
    pub fn set_flow_masks(&mut self, name: &str, masks: Vec<FlowObject>) -> Result<()> {
        let opened = masks
            .into_iter()
            .map(|mask| {
                if mask.kind() == FlowKind::RasterStack {
                    return Err(Error::configuration(format!(
                        "input '{}': a {} cannot be used as a mask",
                        name,
                        mask.kind()
                    )));
                }
                inputs::open(&self.storage, name, mask)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("Registered {} mask(s) as '{}'", opened.len(), name);
        self.masks.insert(name.to_string(), opened);
        Ok(())
    }

    /// Run `operator` over all tiles and return the per-tile results in
    /// row-major tile order.
    pub fn apply<O: Operator>(&self, operator: &O) -> Result<Vec<O::Block>> {
        let (blocks, outputs) = self.run(operator)?;
        self.finish(outputs)?;
        Ok(blocks)
    }

    /// Run `operator` over all tiles and combine the results with its
    /// [`Aggregate::aggregate`]. Outputs are only published when the
    /// aggregation succeeds.
    pub fn apply_aggregate<O: Aggregate>(&self, operator: &O) -> Result<O::Output> {
        let (blocks, outputs) = self.run(operator)?;
        let output = operator.aggregate(blocks, self.grid())?;
        self.finish(outputs)?;
        Ok(output)
    }

    fn progress(&self) -> Option<&dyn ProgressSink> {
        self.config.progress.as_deref()
    }

    fn finish(&self, outputs: Outputs) -> Result<()> {
        outputs.finalize(&self.storage, self.progress())?;
        if let Some(progress) = self.progress() {
            progress.set_percentage(100.0);
        }
        Ok(())
    }

    fn run<O: Operator>(&self, operator: &O) -> Result<(Vec<O::Block>, Outputs)> {
        let grid = self.grid();
        let tiles: Vec<Subgrid> = grid.subgrids(self.config.block_size).collect();
        let total = tiles.len();
        let description = operator.description();
        let progress = self.progress();
        let threads = match self.config.processing {
            ProcessingMode::Sequential => 1,
            ProcessingMode::Parallel => available_threads(),
            ProcessingMode::ParallelWith(n) => n,
        };
        info!(
            "Applying {} on a {}x{} grid in {} tile(s), {} thread(s)",
            description,
            grid.height(),
            grid.width(),
            total,
            threads
        );
        if let Some(progress) = progress {
            progress.set_text(&description);
            progress.set_percentage(0.0);
        }

        let start = Instant::now();
        let outputs = Outputs::new(&self.outputs);
        let done = AtomicUsize::new(0);
        let blocks = self
            .config
            .processing
            .try_map(total, |i| {
                let tile = &tiles[i];
                let block = self.run_tile(operator, grid, tile, &outputs).map_err(|e| {
                    TileFailure(if e.is_canceled() {
                        Error::Canceled
                    } else {
                        Error::Tile {
                            index: tile.index,
                            row: tile.row,
                            col: tile.col,
                            source: Box::new(e),
                        }
                    })
                })?;
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = progress {
                    progress.set_percentage(100.0 * finished as f64 / total as f64);
                }
                Ok(block)
            })
            .map_err(|TileFailure(e)| e)?;
        info!("{} finished in {:.2?}", description, start.elapsed());
        Ok((blocks, outputs))
    }

    fn run_tile<O: Operator>(&self, operator: &O, grid: &Grid, tile: &Subgrid, outputs: &Outputs) -> Result<O::Block> {
        if self.progress().is_some_and(|p| p.is_canceled()) {
            return Err(Error::Canceled);
        }
        debug!(
            "Tile {} (row {}, col {}) at ({}, {}), {}x{}",
            tile.index,
            tile.row,
            tile.col,
            tile.row_offset,
            tile.col_offset,
            tile.grid.height(),
            tile.grid.width()
        );
        let mut ctx = TileContext::new(self, grid, tile, outputs);
        operator.ufunc(&mut ctx)
    }
}

fn is_categorical(kind: FlowKind) -> bool {
    matches!(
        kind,
        FlowKind::Classification | FlowKind::Fraction | FlowKind::VectorClassification
    )
}
