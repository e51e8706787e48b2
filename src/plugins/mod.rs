//! Plugin system: named step processors invoked by workflow plugin steps.

mod base;
mod registry;

pub use base::{Plugin, PluginEntry, PluginFn, PluginModel};
pub use registry::PluginManager;
