//! Implementations shipped with the engine, addressed by `builtin:*` entry
//! points.

pub mod command;

use crate::modules::FactoryCatalog;

pub use command::CommandExecutor;

pub const COMMAND_ENTRY: &str = "builtin:command";

pub fn register(catalog: FactoryCatalog) -> FactoryCatalog {
    catalog.register(COMMAND_ENTRY, command::create)
}
