//! RPM gateway library
//!
//! Decodes the radiation portal monitor line protocol into typed gamma,
//! neutron, tamper, speed and occupancy events. Exposes modules for
//! integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
