// src/config/mod.rs

//! Configuration: raw YAML models, `.env` overlay, validation and the
//! resolved [`Catalog`].

pub mod catalog;
pub mod env;
pub mod loader;
pub mod model;
pub mod validate;

pub use catalog::{
    Catalog, Command, CommandKind, CommandList, Hooks, Host, NotificationChannel, PackageRef,
    PackageSpec, Selection, Templates, UserSpec,
};
pub use loader::{ResolveOptions, load_catalog as resolve};
