//! Stream-json line parsing

mod parser;

pub use parser::{parse_event, salvage_result};
