#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod connectors;
pub mod convert;
mod index;


pub use self::{
    connectors::ConnectorIndex,
    index::{Index, SharedIndex},
};
