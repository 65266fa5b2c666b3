//! corral-modules: server extension modules distributed through npm.
//!
//! Modules are listed in a TOML file, installed as npm packages into the
//! state directory and unpacked into `<state>/mod/`, where the launcher
//! picks them up with [`find_libraries`].

mod error;
mod loader;

pub use error::ModuleError;
pub use loader::{
    find_libraries, ModuleDescriptor, ModuleLoader, ModuleResolver, METADATA_FILE, MODULE_DIR,
};
