mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, TEXT, VISION};
pub use selectors::{ModelSelection, ModelSelector};
