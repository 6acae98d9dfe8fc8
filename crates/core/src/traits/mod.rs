pub mod condition;
pub mod dependent;
pub mod selector;

pub use condition::Condition;
pub use dependent::{Dependency, DependencyGroup, Dependent};
pub use selector::{DependencySelector, ExperimentSelector};
