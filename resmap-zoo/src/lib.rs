/*! The resource mapping zoo: one device, a shader visible heap littered with
 *  aliases, and four draws binding the same resources through shader model
 *  5.0 registers, 5.1 arrays, register spaces and an unbounded table.
 */

#![warn(trivial_casts, trivial_numeric_casts, unused_extern_crates)]

pub mod human;
pub mod report;
pub mod scenario;

pub use report::ZooReport;
pub use scenario::{Zoo, ZooConfig, ZooError, MARKERS};
