pub mod builder;
pub mod maestro;

pub use builder::{NodeBuilder, TallyRuntime};
pub use maestro::Maestro;
