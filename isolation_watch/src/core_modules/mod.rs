pub mod detection;
pub mod engagement;
pub mod identity;
pub mod isolation_store;
pub mod proximity;
pub mod stats;
pub mod task_assigner;
