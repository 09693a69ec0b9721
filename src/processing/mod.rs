pub mod color;
pub mod enhance;
pub mod exposure;
pub mod filters;
pub mod sharpness;
