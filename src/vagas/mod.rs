//! Vagas Layer
//!
//! Live occupancy board for the yard's parking slots.

pub mod grid;
pub mod watcher;

pub use grid::OccupancyGrid;
pub use watcher::GridWatcher;
