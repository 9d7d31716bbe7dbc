//! `apcore`: an in-process module execution runtime. Structured, typed
//! requests are dispatched to named handler units ("modules") through a
//! fixed safety-and-validation pipeline, guarded by an access-control
//! matcher, wrapped in an onion-style middleware chain, and observable via
//! tracing/metrics/structured logging.
//!
//! Six subsystems, bottom-up: shared data model ([`context`], [`config`],
//! [`error`]), [`pattern`] matching, [`acl`], [`schema`], [`registry`],
//! [`middleware`], and the [`executor`] that composes them. [`observability`]
//! and [`bindings`] sit alongside as optional, pluggable surfaces.

pub mod acl;
pub mod bindings;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod middleware;
pub mod observability;
pub mod pattern;
pub mod registry;
pub mod schema;

pub use acl::{Acl, AclRule, Effect};
pub use config::Config;
pub use context::{Context, Identity};
pub use error::{Error, Result, ValidationErrorDetail};
pub use executor::Executor;
pub use middleware::{Middleware, MiddlewareManager};
pub use registry::{Annotations, Module, ModuleDescriptor, Registry};
pub use schema::{ResolvedSchema, Validator, ValidatorOptions};
