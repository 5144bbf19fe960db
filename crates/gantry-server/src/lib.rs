//! Gantry server: configuration, logging and process wiring around
//! [`gantry_core`].

pub mod config;
pub mod startup;
