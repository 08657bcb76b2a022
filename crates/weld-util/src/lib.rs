#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Helpers shared by the weld crates: lossy source reading, atomic file replacement and
//! BLAKE3 content hashes for chunk names and CSS identity. Nothing here logs.

pub mod fs;
pub mod hash;
