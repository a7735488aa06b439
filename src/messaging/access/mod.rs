//! Visibility resolution and external collaborator lookups.

pub mod directory;
pub mod resolver;

pub use directory::{
    AgencyDirectory, InMemoryAgencyDirectory, InMemoryPropertyDirectory, PropertyDirectory,
};
pub use resolver::{Access, resolve};
