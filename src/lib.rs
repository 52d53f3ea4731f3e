// src/lib.rs

// Modules publics, utilisés par le binaire (amm_sync.rs).
pub mod config;
pub mod context;
pub mod decoders;
pub mod error;
pub mod math;
pub mod monitoring;
pub mod rpc;
pub mod state;

#[cfg(test)]
mod testing;
