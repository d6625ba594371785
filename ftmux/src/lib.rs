//! Multiplexes the ftrace configurations of concurrent tracing sessions onto
//! the single, global tracefs state of the kernel.
pub mod ftrace;
