#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

//! Bundler core for weld: module resolution, the module graph, CommonJS/ESM interop
//! analysis and chunk assignment.

pub mod bundler;
pub mod chunks;
pub mod config;
pub mod error;
pub mod fs;
pub mod graph;
pub mod interop;
pub mod parse;
pub mod resolver;

pub use bundler::{BindingSummary, BuildOutput, Bundler, ModuleSummary};
pub use chunks::{Chunk, ChunkGraph, ChunkId, ChunkKind, ChunkManifest, ChunkType};
pub use config::{AdvancedChunksConfig, BuildOptions, ChunkGroupConfig, SplitSettings};
pub use error::{Error, Result};
pub use fs::{FileSystem, FileSystemRef, MemoryFileSystem, OsFileSystem};
pub use graph::{ExportKind, ModuleGraph, ModuleId};
pub use resolver::{Resolution, ResolutionKind, ResolveReasonCode, Resolver, ResolverConfig};

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
