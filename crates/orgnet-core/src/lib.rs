//! OrgNet core library: organizational network analysis engine.
//!
//! Turns raw communication records into a weighted graph of people, scores
//! centrality and influence, detects communities, compares formal and
//! informal hierarchy, flags hidden influencers and tracks communication
//! health. Results are written back through the store contracts in
//! [`store`]; the bundled SQLite adapter implements all of them.
//!
//! With the `python` feature the crate also builds as the `_orgnet_core`
//! extension module.

pub mod analysis;
pub mod config;
pub mod errors;
pub mod graph;
pub mod models;
pub mod store;

#[cfg(feature = "python")]
mod python;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn _orgnet_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)
}
