mod common;
mod policy;
mod revocation;
