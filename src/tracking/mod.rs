//! Counting movie views from the visitor's side: deciding whether a visit counts, reporting it to
//! the server once, and keeping every on-page counter in step with the result.

mod attention;
mod bus;
mod client;
mod counter;
mod policy;
mod storage;

pub use attention::*;
pub use bus::*;
pub use client::*;
pub use counter::*;
pub use policy::*;
pub use storage::*;
