//! topoc: infrastructure topology compiler.
//!
//! Declarative resource graphs in, provider-agnostic provisioning plans out.
//! Symbolic references resolved, provisioning order computed, least-privilege
//! grants derived. Never talks to a cloud control plane.

pub mod cli;
pub mod core;
pub mod provenance;
