//! The two-phase operator contract: one `ufunc` call per tile, then one
//! `aggregate` call over all tile results

use super::TileContext;
use hubflow_core::{Grid, Result};

/// Per-tile computation run by the applier.
///
/// `ufunc` must only read inputs and write outputs through the context; tiles
/// may run concurrently and in any order.
pub trait Operator: Sync {
    /// Partial result of one tile
    type Block: Send;

    fn ufunc(&self, ctx: &mut TileContext<'_>) -> Result<Self::Block>;

    /// Text handed to the progress sink
    fn description(&self) -> String {
        let name = std::any::type_name::<Self>();
        let name = name.split('<').next().unwrap_or(name);
        name.rsplit("::").next().unwrap_or(name).to_string()
    }
}

/// Combination of the tile results, received in row-major tile order
pub trait Aggregate: Operator {
    type Output;

    fn aggregate(&self, blocks: Vec<Self::Block>, grid: &Grid) -> Result<Self::Output>;
}
