//! Provenance: BLAKE3 fingerprints and the compile event log.

pub mod eventlog;
pub mod hasher;
