// Public API - dissection engine and its data types
pub mod error;
pub mod probe;
pub mod state;

// Output, configuration and replay support for the binary
pub mod capture;
pub mod cli;
pub mod config;
pub mod export;
pub mod prefs;

pub use error::{DissectError, Result};
pub use probe::{Classifier, Clock};
pub use state::{IcmpResponse, absorb};
