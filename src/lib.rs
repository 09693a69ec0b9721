//! GPU photo pipeline: automatic enhancement on a worker pool, tonal
//! settings and effect filter chains on a wgpu (or software) context, and a
//! batch executor that writes the edited results.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod executor;
pub mod filter;
pub mod gpu;
pub mod processing;
pub mod processor;
pub mod raster;
pub mod settings;
pub mod shaders;
pub mod task;
pub mod thumbnail;
