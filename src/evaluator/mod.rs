/// Pure threshold evaluation of readings against sensor ranges
pub mod threshold;

pub use threshold::{crossed_bound, evaluate, Verdict, Violation};
