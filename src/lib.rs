pub mod app;
pub mod shutdown;

pub use app::{Application, ExperimentPlan};
pub use shutdown::{ShutdownManager, ShutdownSignal};
