//! # ChronOS Scheduling Policies
//!
//! The pluggable policy implementations registered into the framework:
//!
//! - Local: RMA, EDF, HVDF, FIFO_RA, RMA-ICPP, RMA-OCPP (FIFO ships with
//!   the framework itself)
//! - Global: GFIFO (concurrent), GRMA (stop-the-world)
//!
//! Each policy is a strategy over the framework's shared primitives; none
//! of them owns a queue or a task.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod global;
pub mod local;

#[cfg(test)]
mod scenario_tests;

pub use global::gfifo::Gfifo;
pub use global::grma::Grma;
pub use local::edf::Edf;
pub use local::fifo_ra::FifoRa;
pub use local::hvdf::Hvdf;
pub use local::rma::Rma;
pub use local::rma_icpp::RmaIcpp;
pub use local::rma_ocpp::RmaOcpp;

use chronos_core::SchedResult;
use chronos_sched::Chronos;
use alloc::sync::Arc;

/// Register the whole policy family with a framework instance.
pub fn register_defaults(chronos: &Chronos) -> SchedResult<()> {
    chronos.add_local_scheduler(Arc::new(Rma::new()))?;
    chronos.add_local_scheduler(Arc::new(Edf::new()))?;
    chronos.add_local_scheduler(Arc::new(Hvdf::new()))?;
    chronos.add_local_scheduler(Arc::new(FifoRa::new()))?;
    chronos.add_local_scheduler(Arc::new(RmaIcpp::new()))?;
    chronos.add_local_scheduler(Arc::new(RmaOcpp::new()))?;
    chronos.add_global_scheduler(Arc::new(Gfifo::new()))?;
    chronos.add_global_scheduler(Arc::new(Grma::new()))?;
    log::info!("registered default scheduling policies");
    Ok(())
}
