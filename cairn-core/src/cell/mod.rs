//! Async Cells
//!
//! The leaf primitive: a container for the outcome of one asynchronous
//! operation, readable in a blocking style. The cache stores one cell per
//! key; the graph wraps asynchronous derivations in cells.

mod async_cell;
mod suspension;

pub use async_cell::{AsyncCell, CellId, CellState};
pub use suspension::Suspension;
