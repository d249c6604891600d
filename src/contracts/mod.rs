//! Standard contract programs and the log-annotation parser that reads
//! their effects back out of a finished transaction.

pub mod result;
pub mod standard;
