//! Domain core for spray-process management.
//!
//! Entities (workpieces and trajectories), trajectory geometry, batch
//! aggregation maths and validation, all without I/O.

pub mod batch;
pub mod category;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod hashing;
pub mod target;
pub mod trajectory;
pub mod types;
pub mod validation;
pub mod workpiece;
