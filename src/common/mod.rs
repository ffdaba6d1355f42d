//! Internal plumbing shared across the crate, kept out of the public API the
//! way `hyper`'s own `src/common` module does.

pub(crate) mod drain;
