mod toposort;

pub use toposort::toposort;
