//! All the interface bits for the different architectures.
pub mod power;
