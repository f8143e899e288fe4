//! Collect hardware and network facts from servers over SSH and reconcile
//! them into a NetBox inventory.

pub mod bootstrap;
pub mod config;
pub mod executor;
pub mod facts;
pub mod fleet;
pub mod netbox;
pub mod reconcile;
pub mod utils;

#[cfg(test)]
pub mod testing;
