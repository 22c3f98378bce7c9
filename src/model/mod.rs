pub mod descriptor;

pub use descriptor::{ExecutionMode, ModuleDescriptor, PlacementAreas, PlacementMode, ProjectDescriptor};
