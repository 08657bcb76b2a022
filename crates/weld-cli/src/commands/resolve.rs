//! `weld resolve` command implementation.

use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use weld_core::{OsFileSystem, Resolution, ResolutionKind, Resolver, ResolverConfig};

#[derive(Serialize)]
struct ResolveResultJson {
    ok: bool,
    specifier: String,
    from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    tried: Vec<String>,
}

pub fn run(
    cwd: &Path,
    specifier: &str,
    from: Option<PathBuf>,
    require: bool,
    json: bool,
) -> Result<()> {
    let from = match from {
        Some(path) if path.is_absolute() => path,
        Some(path) => cwd.join(path),
        // Any file name works: only its directory is used.
        None => cwd.join("index.js"),
    };
    let kind = if require {
        ResolutionKind::Require
    } else {
        ResolutionKind::Import
    };

    let resolver = Resolver::new(Arc::new(OsFileSystem), ResolverConfig::default());
    let resolution = resolver.resolve(&from, specifier, kind);

    let mut result = ResolveResultJson {
        ok: resolution.is_found(),
        specifier: specifier.to_string(),
        from: from.display().to_string(),
        resolved: None,
        external: None,
        reason: None,
        tried: Vec::new(),
    };
    match resolution {
        Resolution::Module(path) => result.resolved = Some(path.display().to_string()),
        Resolution::External(name) => result.external = Some(name),
        Resolution::NotFound { reason, tried } => {
            result.reason = Some(reason.to_string());
            result.tried = tried.iter().map(|p| p.display().to_string()).collect();
        }
    }

    if json {
        println!("{}", serde_json::to_string(&result).into_diagnostic()?);
    } else if let Some(resolved) = &result.resolved {
        println!("{resolved}");
    } else if let Some(external) = &result.external {
        println!("external: {external}");
    } else {
        eprintln!(
            "error: cannot resolve '{specifier}' from {} ({})",
            result.from,
            result.reason.as_deref().unwrap_or("NOT_FOUND")
        );
        for tried in &result.tried {
            eprintln!("  tried {tried}");
        }
    }

    if !result.ok {
        std::process::exit(1);
    }
    Ok(())
}
