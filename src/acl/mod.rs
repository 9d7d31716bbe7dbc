//! Access-control matcher (spec §4.2).

mod engine;
mod rule;

pub use engine::Acl;
pub use rule::{AclConfigDocument, AclRule, Conditions, Effect};
