//! `weld bundle` command implementation.
//!
//! Runs one build and prints the chunk partition, either as a summary or as the full
//! build output in JSON.

use miette::{miette, IntoDiagnostic, Result, WrapErr};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use weld_core::{BuildOptions, BuildOutput, Bundler, OsFileSystem, ResolverConfig};

/// Version of the `--json` output shape.
const BUNDLE_SCHEMA_VERSION: u32 = 1;

/// Bundle command action.
#[derive(Debug, Clone)]
pub struct BundleAction {
    /// Entry point files, relative to `cwd`.
    pub entries: Vec<PathBuf>,
    pub cwd: PathBuf,
    /// JSON options file; flags are applied on top.
    pub config: Option<PathBuf>,
    pub splitting: bool,
    pub css_chunking: bool,
    pub tree_shaking: bool,
    /// `KEY=VALUE` pairs.
    pub define: Vec<String>,
    pub external: Vec<String>,
    /// Where to write the chunk manifest.
    pub outfile: Option<PathBuf>,
    pub init_plan: bool,
}

/// JSON output for the bundle command.
#[derive(Serialize)]
struct BundleResultJson<'a> {
    ok: bool,
    schema_version: u32,
    duration_ms: u64,
    #[serde(flatten)]
    output: Option<&'a BuildOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<BundleErrorJson>,
}

#[derive(Serialize)]
struct BundleErrorJson {
    code: String,
    message: String,
}

/// Merge the options file (if any) with the command-line flags.
pub fn load_options(action: &BundleAction) -> Result<BuildOptions> {
    let mut options = match &action.config {
        Some(path) => {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                action.cwd.join(path)
            };
            let text = weld_util::fs::read_to_string_lossy(&path)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str::<BuildOptions>(&text)
                .into_diagnostic()
                .wrap_err_with(|| format!("Invalid build options in {}", path.display()))?
        }
        None => BuildOptions::default(),
    };

    options.cwd = action.cwd.clone();
    options.entrypoints.extend(action.entries.iter().cloned());
    options.splitting |= action.splitting;
    options.css_chunking |= action.css_chunking;
    options.tree_shaking |= action.tree_shaking;
    options.external.extend(action.external.iter().cloned());
    for pair in &action.define {
        let (key, value) = parse_define(pair)?;
        options.define.insert(key, value);
    }
    Ok(options)
}

/// Split `KEY=VALUE`. The value keeps its quotes: `'"production"'` is a string literal.
fn parse_define(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(miette!(
            "invalid --define '{pair}': expected KEY=VALUE (e.g. process.env.NODE_ENV='\"production\"')"
        )),
    }
}

/// Run the bundle command.
pub fn run(action: BundleAction, json: bool) -> Result<()> {
    let start = Instant::now();
    let options = load_options(&action)?;
    debug!(entries = options.entrypoints.len(), "bundle options loaded");

    let bundler = Bundler::new(Arc::new(OsFileSystem), ResolverConfig::default());
    let result = bundler.build(&options);
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(output) => {
            if let Some(outfile) = &action.outfile {
                write_manifest(&action.cwd.join(outfile), &output)?;
            }

            if json {
                let json_result = BundleResultJson {
                    ok: true,
                    schema_version: BUNDLE_SCHEMA_VERSION,
                    duration_ms,
                    output: Some(&output),
                    error: None,
                };
                println!("{}", serde_json::to_string(&json_result).into_diagnostic()?);
            } else {
                print_summary(&output, duration_ms);
                if action.init_plan {
                    print!("{}", output.init_plan.render_all());
                }
                for warning in &output.warnings {
                    eprintln!("  warning: {warning}");
                }
            }
            Ok(())
        }
        Err(e) => {
            if json {
                let json_result = BundleResultJson {
                    ok: false,
                    schema_version: BUNDLE_SCHEMA_VERSION,
                    duration_ms,
                    output: None,
                    error: Some(BundleErrorJson {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    }),
                };
                println!("{}", serde_json::to_string(&json_result).into_diagnostic()?);
            } else {
                eprintln!("error[{}]: {e}", e.code());
                if !e.is_user_facing() {
                    eprintln!("  this is a bug in weld, please report it");
                }
            }
            std::process::exit(1);
        }
    }
}

fn write_manifest(path: &Path, output: &BuildOutput) -> Result<()> {
    let manifest = serde_json::to_vec_pretty(&serde_json::json!({ "chunks": output.chunks }))
        .into_diagnostic()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).into_diagnostic()?;
    }
    weld_util::fs::atomic_write(path, &manifest)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to write {}", path.display()))
}

fn print_summary(output: &BuildOutput, duration_ms: u64) {
    println!(
        "  {} modules -> {} chunks ({duration_ms}ms)",
        output.modules.len(),
        output.chunks.len()
    );
    for chunk in &output.chunks {
        println!(
            "    {:<7} {} ({:.1}KB, {} modules)",
            format!("{:?}", chunk.kind).to_lowercase(),
            chunk.file,
            chunk.size as f64 / 1024.0,
            chunk.modules.len()
        );
    }
    for cycle in &output.cycles {
        println!("  cycle: {}", cycle.join(" -> "));
    }
    for unused in &output.unused_exports {
        println!("  unused in {}: {}", unused.module, unused.exports.join(", "));
    }
}
