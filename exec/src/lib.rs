//! Execution engine: the shared translation cache and the per-vCPU
//! loop that drives lookup → translate → execute.
//!
//! An [`Engine`] owns the code buffer, the TB store and the host
//! backend. Each [`VCpu`] it creates runs on its own thread with a
//! private software MMU, jump cache and IR context, and is controlled
//! from other threads through a [`VCpuHandle`].

mod engine;
mod exclusive;
mod region;
mod runtime;

pub mod config;
pub mod error;
pub mod exec_loop;
pub mod stats;
pub mod tb_store;
pub mod vcpu;

pub use config::{EngineConfig, VCpuConfig};
pub use engine::Engine;
pub use error::ExecError;
pub use exec_loop::VCpu;
pub use stats::{ExecStats, StatsSnapshot};
pub use tb_store::TbStore;
pub use vcpu::{ExitReason, VCpuHandle};
