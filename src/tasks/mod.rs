pub mod coordinator;
pub mod debounce;
pub mod grouping;
pub mod maintenance;

pub use coordinator::TabCoordinator;
