pub mod lines;
pub mod report;

pub use lines::*;
pub use report::*;
