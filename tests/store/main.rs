mod common;
mod paths;
mod pins;
mod revocations;
