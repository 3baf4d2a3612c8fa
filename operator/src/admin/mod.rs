//! Admin Client Registry, Placement Coordinator, and Namespace Coordinator
//! (§2.3-§2.5): everything that speaks the DB's admin HTTP protocol (§6).

pub mod client;
pub mod registry;

pub use client::{AdminClient, Availability, Instance, Placement};
pub use registry::AdminRegistry;
