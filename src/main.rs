use clap::{Parser, Subcommand};
use fmodpack::archive::{Archive, PackOptions};
use fmodpack::export::write_headers;
use fmodpack::IndexWidth;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fmodpack", about = "Pack a file tree into bundle.fmod + keys.json")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a source directory
    Pack {
        #[arg(long)]
        src_dir: PathBuf,
        /// Directory for the generated C++ headers
        #[arg(long)]
        output_cpp_dir: PathBuf,
        /// Directory for bundle.fmod and keys.json
        #[arg(long)]
        output_mod: PathBuf,
        /// Extra extension to treat as text (repeatable)
        #[arg(long = "text-ext", value_name = "EXT")]
        text_ext: Vec<String>,
        /// Index width in bits: 8, 16 or 32
        #[arg(long, default_value = "16", value_parser = parse_width)]
        index_width: IndexWidth,
        /// Seed the label generator for a reproducible archive
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Extract a packed directory
    Extract {
        #[arg(long)]
        mod_dir: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
    },
    /// List archive contents
    List {
        #[arg(long)]
        mod_dir: PathBuf,
    },
    /// Show archive metadata
    Info {
        #[arg(long)]
        mod_dir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fmodpack=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match cli.command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { src_dir, output_cpp_dir, output_mod, text_ext, index_width, seed } => {
            let opts = PackOptions {
                text_extensions: text_ext,
                index_width,
                seed,
                ..PackOptions::default()
            };
            // Headers first: a failure here must not leave a committed archive.
            let staged = Archive::stage(&src_dir, &output_mod, &opts)?;
            write_headers(&output_cpp_dir, staged.manifest())?;
            let manifest = staged.commit()?;
            println!("Done: {} files packed into {}", manifest.files.len(),
                     output_mod.join(fmodpack::archive::BUNDLE_FILE).display());
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { mod_dir, output_dir } => {
            let mut ar = Archive::open(&mod_dir)?;
            let report = ar.extract_all(&output_dir)?;
            for (path, err) in &report.failed {
                eprintln!("  failed  {path}: {err}");
            }
            if !report.is_complete() {
                eprintln!("Extracted {} file(s), {} failed", report.extracted.len(), report.failed.len());
                return Ok(ExitCode::FAILURE);
            }
            println!("Extraction complete: {} file(s) written to {}",
                     report.extracted.len(), output_dir.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { mod_dir } => {
            let ar = Archive::open(&mod_dir)?;
            println!("Archive: {}", mod_dir.display());
            println!("{:<40} {:>12} {:>12} {:>7}", "Path", "Offset", "Length", "Kind");
            for info in ar.list() {
                let kind = if info.binary { "binary" } else { "text" };
                println!("{:<40} {:>12} {:>12} {:>7}", info.path, info.offset, info.length, kind);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { mod_dir } => {
            let ar = Archive::open(&mod_dir)?;
            let m = ar.manifest();
            let text_files = m.files.iter().filter(|r| !r.binary).count();
            let created = m.created
                .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "—".into());

            println!("── fmod archive ─────────────────────────────────────────");
            println!("  Path           {}", ar.path().display());
            println!("  Archive id     {}", ar.archive_id().unwrap_or("—"));
            println!("  Created        {}", created);
            println!("  Index width    {}", m.table.width());
            println!("  Characters     {}", m.table.len());
            println!("  Files          {} ({} text, {} binary)",
                     m.files.len(), text_files, m.files.len() - text_files);
            println!("  Blob size      {} B", ar.blob_len());
            println!("  Blob BLAKE3    {}", ar.blob_hash_hex()?);
            match m.validate_layout(ar.blob_len()) {
                Ok(())  => println!("  Layout         contiguous"),
                Err(e)  => println!("  Layout         {e}"),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_width(s: &str) -> Result<IndexWidth, String> {
    s.parse::<u32>()
        .ok()
        .and_then(IndexWidth::from_bits)
        .ok_or_else(|| format!("unsupported index width '{s}' (expected 8, 16 or 32)"))
}
