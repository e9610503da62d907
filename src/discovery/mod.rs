//! Service discovery over the coordination store
//!
//! - [`Registrar`]: keeps an instance's leased record alive
//! - [`Resolver`]: mirrors a prefix into a local address list
//! - [`Registry`]: owns the registrars and resolvers of one process

pub mod registrar;
pub mod registry;
pub mod resolver;

pub use registrar::{Registrar, RegistrarHandle, RegistrationStatus};
pub use registry::Registry;
pub use resolver::{AddressSet, AddressUpdater, Resolver, ResolverHandle, ResolverState};
