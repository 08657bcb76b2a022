#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "weld")]
#[command(author, version, about = "Resolve, link and chunk JavaScript/TypeScript module graphs", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v INFO, -vv DEBUG, -vvv TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build the module graph and assign modules to chunks
    Bundle {
        /// Entry point files
        entries: Vec<PathBuf>,

        /// JSON file with build options (same shape as the library's BuildOptions)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,

        /// Extract shared and group chunks
        #[arg(long)]
        splitting: bool,

        /// Deduplicate CSS chunks by content
        #[arg(long)]
        css_chunking: bool,

        /// Report statically unused exports
        #[arg(long)]
        tree_shaking: bool,

        /// Define constants for branch analysis (e.g., --define process.env.NODE_ENV='"production"')
        #[arg(long, value_name = "KEY=VALUE")]
        define: Vec<String>,

        /// Specifier prefixes to leave unbundled
        #[arg(long, value_delimiter = ',')]
        external: Vec<String>,

        /// Write the chunk manifest to this file
        #[arg(long, short = 'o', value_name = "FILE")]
        outfile: Option<PathBuf>,

        /// Print the module initializer plan
        #[arg(long)]
        init_plan: bool,
    },

    /// Resolve one import specifier
    Resolve {
        /// The specifier to resolve
        specifier: String,

        /// Importing file (defaults to a file in the working directory)
        #[arg(long, value_name = "FILE")]
        from: Option<PathBuf>,

        /// Resolve as `require()` instead of `import`
        #[arg(long)]
        require: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Bundle {
            entries,
            config,
            splitting,
            css_chunking,
            tree_shaking,
            define,
            external,
            outfile,
            init_plan,
        }) => {
            let span = tracing::info_span!("bundle", cmd = "bundle", cwd = %cwd.display());
            let _guard = span.enter();
            commands::bundle::run(
                commands::bundle::BundleAction {
                    entries,
                    cwd,
                    config,
                    splitting,
                    css_chunking,
                    tree_shaking,
                    define,
                    external,
                    outfile,
                    init_plan,
                },
                cli.json,
            )
        }
        Some(Commands::Resolve {
            specifier,
            from,
            require,
        }) => commands::resolve::run(&cwd, &specifier, from, require, cli.json),
    }
}
