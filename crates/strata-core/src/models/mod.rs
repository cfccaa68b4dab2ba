//! Data models for the control plane
//!
//! Each sub-module covers one task family or one piece of configuration.

mod archive;
mod download;
mod events;
mod file_location;
mod metadata;
mod migration;
mod tiering;
mod upload;

pub use archive::*;
pub use download::*;
pub use events::*;
pub use file_location::*;
pub use metadata::*;
pub use migration::*;
pub use tiering::*;
pub use upload::*;
