//! Core of a small MapReduce engine: a coordinator scheduler, a worker
//! control loop, and pluggable storage backends for intermediate and
//! output artifacts.

pub mod mr;
