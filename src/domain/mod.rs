//! Domain model: records, value objects, the status state machine and the
//! ports the application layer talks through.

pub mod gateway;
pub mod money;
pub mod ports;
pub mod report;
pub mod status;
pub mod token;
pub mod transaction;
