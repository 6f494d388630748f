//! Local (per-CPU) scheduling policies.

pub mod edf;
pub mod fifo_ra;
pub mod hvdf;
pub mod rma;
pub mod rma_icpp;
pub mod rma_ocpp;
