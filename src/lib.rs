pub mod bridge;
pub mod calendar;
pub mod compactor;
pub mod config;
pub mod dayplan;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod store;
pub mod wal;
