//! Bigpack CLI - build, inspect and extract `.big` archives.
//!
//! This is the main entry point for the bigpack command-line application.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use bigpack::prelude::*;

/// Bigpack - .big archive tool
#[derive(Parser)]
#[command(name = "bigpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, env = "BIGPACK_CONFIG", default_value = "archive_config.json")]
    config: PathBuf,

    /// Worker threads, 0 for one per logical core
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Print one text line per percent instead of a progress bar
    #[arg(long, global = true)]
    plain_progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an archive from a task file or a directory
    Create {
        /// Build task (JSON)
        #[arg(short, long, conflicts_with = "root")]
        task: Option<PathBuf>,

        /// Pack every file below this directory into a single TOC
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// TOC name used with --root
        #[arg(long, default_value = "data")]
        toc: String,

        /// Output archive
        #[arg(short, long)]
        output: PathBuf,

        /// Archive name, defaults to the output file stem
        #[arg(long)]
        name: Option<String>,

        /// Obfuscate with a freshly generated key
        #[arg(long)]
        encrypt: bool,

        /// Seed for the generated key
        #[arg(long, requires = "encrypt")]
        key_seed: Option<u64>,

        /// Obfuscate with the raw key stored in this file
        #[arg(long, conflicts_with = "encrypt")]
        key_file: Option<PathBuf>,

        /// Compression level, 0-10
        #[arg(short, long)]
        level: Option<u32>,

        /// Compute the tool signature
        #[arg(long)]
        keep_sign: bool,

        /// Folder (trailing `/`) or file wildcard to leave out; repeatable
        #[arg(long)]
        ignore: Vec<String>,
    },

    /// Print the TOCs and files of an archive
    List {
        archive: PathBuf,
    },

    /// Check every file against its stored CRC
    Test {
        archive: PathBuf,
    },

    /// Extract every file of an archive
    Extract {
        archive: PathBuf,

        /// Output directory
        #[arg(short, long, env = "OUTPUT_FOLDER")]
        output: PathBuf,
    },

    /// Print the archive signature
    Hash {
        archive: PathBuf,

        /// Also recompute both signatures and compare them with the header
        #[arg(long)]
        verify: bool,
    },

    /// Print the folder hierarchy as JSON
    Tree {
        archive: PathBuf,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Values from the settings file, overridden by command-line flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct Settings {
    thread_number: usize,
    compress_level: u32,
    keep_sign: bool,
    encryption: bool,
    encryption_key_seed: Option<u64>,
    ignore_list: Vec<String>,
    legacy_encoding: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thread_number: 0,
            compress_level: 9,
            keep_sign: false,
            encryption: false,
            encryption_key_seed: None,
            ignore_list: Vec::new(),
            legacy_encoding: None,
        }
    }
}

impl Settings {
    /// Read `path`, falling back to defaults when it is missing or malformed.
    fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::info!("{} not found, using default settings", path.display());
                return Self::default();
            }
            Err(err) => {
                tracing::warn!("cannot read {}: {err}; using default settings", path.display());
                return Self::default();
            }
        };

        serde_json::from_str(&text).unwrap_or_else(|err| {
            tracing::warn!("malformed {}: {err}; using default settings", path.display());
            Self::default()
        })
    }

    fn read_options(&self) -> Result<ReadOptions> {
        let options = ReadOptions::default().with_threads(self.thread_number);
        match &self.legacy_encoding {
            Some(label) => Ok(options.with_encoding_label(label)?),
            None => Ok(options),
        }
    }
}

/// Renders [`Event`]s as log lines plus a progress bar or text lines.
enum Reporter {
    Bar {
        style: ProgressStyle,
        bar: Option<ProgressBar>,
    },
    Plain(ProgressLog),
}

impl Reporter {
    fn new(plain: bool) -> Result<Self> {
        if plain {
            return Ok(Reporter::Plain(ProgressLog::new()));
        }
        let style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )?
            .progress_chars("#>-");
        Ok(Reporter::Bar { style, bar: None })
    }

    fn handle(&mut self, event: &Event) {
        match self {
            Reporter::Plain(log) => {
                if let Some(line) = log.handle(event) {
                    println!("{line}");
                }
            }
            Reporter::Bar { style, bar } => {
                if let Some(message) = &event.message {
                    match bar {
                        Some(bar) => bar.suspend(|| log_message(event.severity, message)),
                        None => log_message(event.severity, message),
                    }
                }
                if let Some((current, max)) = event.progress {
                    let bar = bar.get_or_insert_with(|| {
                        ProgressBar::new(max as u64).with_style(style.clone())
                    });
                    bar.set_length(max as u64);
                    bar.set_position(current as u64);
                    if let Some(file) = &event.file {
                        bar.set_message(file.clone());
                    }
                }
            }
        }
    }

    fn finish(&mut self) {
        match self {
            Reporter::Bar { bar, .. } => {
                if let Some(bar) = bar.take() {
                    bar.finish_and_clear();
                }
            }
            Reporter::Plain(log) => log.reset(),
        }
    }
}

fn log_message(severity: Severity, message: &str) {
    match severity {
        Severity::Info => tracing::info!("{message}"),
        Severity::Warn => tracing::warn!("{message}"),
        Severity::Error => tracing::error!("{message}"),
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.config);
    if let Some(threads) = cli.threads {
        settings.thread_number = threads;
    }
    let mut reporter = Reporter::new(cli.plain_progress)?;

    match cli.command {
        Commands::Create {
            task,
            root,
            toc,
            output,
            name,
            encrypt,
            key_seed,
            key_file,
            level,
            keep_sign,
            ignore,
        } => {
            if let Some(level) = level {
                settings.compress_level = level;
            }
            settings.keep_sign |= keep_sign;
            settings.encryption |= encrypt;
            if key_seed.is_some() {
                settings.encryption_key_seed = key_seed;
            }
            settings.ignore_list.extend(ignore);

            let (task, base) = match (task, root) {
                (Some(path), _) => load_task(&path)?,
                (None, Some(dir)) => task_from_dir(&dir, &toc, name.as_deref(), &output)?,
                (None, None) => bail!("either --task or --root is required"),
            };
            let encryption = match key_file {
                Some(path) => Encryption::Key(
                    fs::read(&path)
                        .with_context(|| format!("Failed to read key file {}", path.display()))?,
                ),
                None if settings.encryption => Encryption::Generated {
                    seed: settings.encryption_key_seed,
                },
                None => Encryption::None,
            };
            cmd_create(&task, &base, &output, &settings, encryption, &mut reporter)
        }
        Commands::List { archive } => cmd_list(&archive, &settings),
        Commands::Test { archive } => cmd_test(&archive, &settings, &mut reporter),
        Commands::Extract { archive, output } => {
            cmd_extract(&archive, &output, &settings, &mut reporter)
        }
        Commands::Hash { archive, verify } => cmd_hash(&archive, verify, &settings),
        Commands::Tree { archive, output } => cmd_tree(&archive, output.as_deref(), &settings),
    }
}

/// Load a task file; its relative paths resolve against its directory.
fn load_task(path: &Path) -> Result<(BuildTask, PathBuf)> {
    let task = BuildTask::load(path)
        .with_context(|| format!("Failed to load build task {}", path.display()))?;
    let base = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    Ok((task, base))
}

/// A single-TOC task holding every file below `dir`.
fn task_from_dir(
    dir: &Path,
    toc: &str,
    name: Option<&str>,
    output: &Path,
) -> Result<(BuildTask, PathBuf)> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(dir)
                .context("walked outside the source directory")?;
            files.push(relative.to_path_buf());
        }
    }
    if files.is_empty() {
        bail!("{} contains no files", dir.display());
    }

    let name = match name {
        Some(name) => name.to_owned(),
        None => output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .context("Output path has no file name")?,
    };

    let mut toc = TocTask::new(toc, "");
    toc.files = files;
    Ok((
        BuildTask {
            name,
            tocs: vec![toc],
        },
        dir.to_path_buf(),
    ))
}

fn cmd_create(
    task: &BuildTask,
    base: &Path,
    output: &Path,
    settings: &Settings,
    encryption: Encryption,
    reporter: &mut Reporter,
) -> Result<ExitCode> {
    println!("Building {} ({} files listed)", output.display(), task.file_count());

    let options = BuildOptions {
        threads: settings.thread_number,
        compress_level: settings.compress_level,
        skip_tool_signature: !settings.keep_sign,
        ignore_list: settings.ignore_list.clone(),
        encryption,
    };

    let start = Instant::now();
    let result = ArchiveWriter::new(&options).build(task, base, output, |event: &Event| {
        reporter.handle(event)
    });
    reporter.finish();

    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            if let Err(remove) = fs::remove_file(output) {
                tracing::debug!("could not remove partial output: {remove}");
            }
            return Err(err).context("Failed to build archive");
        }
    };

    println!(
        "Packed {} files ({} skipped) in {:?}: {} -> {} bytes{}",
        summary.files,
        summary.skipped,
        start.elapsed(),
        summary.original_bytes,
        summary.archive_bytes,
        if summary.encrypted { ", encrypted" } else { "" }
    );
    println!("Archive signature: {}", hex::encode(summary.archive_signature));
    if let Some(tool) = &summary.tool_signature {
        println!("Tool signature:    {}", hex::encode(tool));
    }

    Ok(ExitCode::SUCCESS)
}

fn open(path: &Path, settings: &Settings) -> Result<Archive> {
    Archive::open_with(path, settings.read_options()?)
        .with_context(|| format!("Failed to open archive {}", path.display()))
}

fn cmd_list(path: &Path, settings: &Settings) -> Result<ExitCode> {
    let archive = open(path, settings)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "Archive: '{}'\n", archive.name())?;
    archive.write_listing(&mut out)?;
    writeln!(out, "Total: {} files", archive.file_infos().len())?;

    Ok(ExitCode::SUCCESS)
}

fn cmd_test(path: &Path, settings: &Settings, reporter: &mut Reporter) -> Result<ExitCode> {
    let archive = open(path, settings)?;

    let start = Instant::now();
    let passed = archive
        .test(|event: &Event| reporter.handle(event))
        .context("Archive test aborted")?;
    reporter.finish();

    println!(
        "TEST: {} - Archive Self Integrity Check ({:?})",
        if passed { "PASSED" } else { "FAILED" },
        start.elapsed()
    );
    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_extract(
    path: &Path,
    output: &Path,
    settings: &Settings,
    reporter: &mut Reporter,
) -> Result<ExitCode> {
    let archive = open(path, settings)?;
    println!(
        "Extracting {} files to {}",
        archive.file_infos().len(),
        output.display()
    );

    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let start = Instant::now();
    let report = archive
        .extract(output, |event: &Event| reporter.handle(event))
        .context("Extraction aborted")?;
    reporter.finish();

    println!(
        "Extracted {} files in {:?} ({} failed, {} CRC mismatches)",
        report.written,
        start.elapsed(),
        report.failed.len(),
        report.crc_mismatches.len()
    );
    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_hash(path: &Path, verify: bool, settings: &Settings) -> Result<ExitCode> {
    let archive = open(path, settings)?;
    println!("{}", hex::encode(archive.archive_signature()?));

    if !verify {
        return Ok(ExitCode::SUCCESS);
    }

    let check = archive.verify_signatures()?;
    let verdict = |ok: bool| if ok { "OK" } else { "MISMATCH" };
    println!("Archive signature: {}", verdict(check.archive));
    match check.tool {
        Some(ok) => println!("Tool signature:    {}", verdict(ok)),
        None => println!("Tool signature:    not present"),
    }

    Ok(if check.archive && check.tool != Some(false) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_tree(path: &Path, output: Option<&Path>, settings: &Settings) -> Result<ExitCode> {
    let archive = open(path, settings)?;
    let json = archive.file_tree()?.to_json_pretty()?;

    match output {
        Some(output) => fs::write(output, json)
            .with_context(|| format!("Failed to write {}", output.display()))?,
        None => println!("{json}"),
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();

        let settings = Settings::load(&dir.path().join("missing.json"));
        assert_eq!(settings.compress_level, 9);
        assert!(!settings.keep_sign);

        let path = dir.path().join("archive_config.json");
        fs::write(&path, r#"{"compress_level": 4, "ignore_list": ["cache/"]}"#).unwrap();
        let settings = Settings::load(&path);
        assert_eq!(settings.compress_level, 4);
        assert_eq!(settings.ignore_list, vec!["cache/".to_string()]);
        assert_eq!(settings.thread_number, 0);

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load(&path).compress_level, 9);
    }

    #[test]
    fn test_task_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("sub").join("b.txt"), b"b").unwrap();

        let (task, base) =
            task_from_dir(dir.path(), "data", None, Path::new("out/Music.big")).unwrap();
        assert_eq!(task.name, "Music");
        assert_eq!(base, dir.path());
        assert_eq!(
            task.tocs[0].files,
            vec![PathBuf::from("a.txt"), Path::new("sub").join("b.txt")]
        );
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "bigpack", "--threads", "2", "create", "--root", "assets", "-o", "x.big", "--ignore",
            "cache/", "--ignore", "*.tmp",
        ])
        .unwrap();
        assert_eq!(cli.threads, Some(2));
        match cli.command {
            Commands::Create { ignore, .. } => assert_eq!(ignore, ["cache/", "*.tmp"]),
            _ => panic!("expected create"),
        }
    }
}
