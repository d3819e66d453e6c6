//! Core compiler: node model, resolution, graph, ordering, grants, emission.

pub mod compiler;
pub mod emitter;
pub mod error;
pub mod graph;
pub mod parser;
pub mod permissions;
pub mod planner;
pub mod resolver;
pub mod schema;
pub mod topology;
pub mod types;
