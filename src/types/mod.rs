//! Core types: identifiers, time, the failure algebra and exits.

pub mod cause;
pub mod exit;
pub mod id;
pub mod status;
pub mod value;

pub use cause::{Cause, CauseLeaf, Defect};
pub use exit::Exit;
pub use id::{FiberId, SequenceNumber, Time};
pub use status::FiberStatus;
pub use value::{AnyCause, AnyExit, Data, Value};
