pub mod response;
pub mod sink;

pub use response::*;
pub use sink::*;
