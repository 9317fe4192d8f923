pub mod book;
pub mod config;
pub mod engine;
pub mod feed;
pub mod limits;
pub mod memory;
pub mod model;
pub mod notify;
pub mod observability;
pub mod rows;
pub mod store;
pub mod sweeper;
pub mod transition;
pub mod venue;
