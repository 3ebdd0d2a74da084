mod common;
mod cookie;
mod data;
mod handshake;
mod lifecycle;
