//! Stack interpreter and the execution profiler it reports to.

pub mod interpreter;
pub mod profiling;

pub use interpreter::{Interpreter, PrintSink};
pub use profiling::{PcCount, ProfileReport, Profiler};
