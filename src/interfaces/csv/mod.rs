//! CSV batch input and output for the command-line interface.

pub mod request_reader;
pub mod transaction_writer;
