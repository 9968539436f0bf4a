pub mod config;
pub mod runtime;
pub mod telemetry;
pub mod transport;

pub use config::NodeConfig;
pub use runtime::{NodeBuilder, TallyRuntime};
pub use telemetry::init_tracing;
pub use transport::{InMemoryNetwork, NetworkError, PeerAddress, Transport};
