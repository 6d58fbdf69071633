//! firmwire-services: fragment reassembly, the transfer state machine and
//! persistence. Sits between the session loop and firmwire-core.

pub mod assembler;
pub mod service;
pub mod sink;
pub mod transfer;

pub use assembler::{AllocationFailure, AssemblyError, Fragment, Transfer};
pub use service::{Delivery, MessageHandler};
pub use sink::{FileSink, MemorySink, PersistenceSink, SinkError};
pub use transfer::{open_envelope, Ignored, Outcome, Phase, TransferController, TransferError};
