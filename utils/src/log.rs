// WARNING
// This makes it easy to import the logging stuff
// Austin Shafer - 2020

#![allow(unused_imports)]
pub use ::log::{debug, error, info, trace, warn, Level, LevelFilter};
