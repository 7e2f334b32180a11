//! sealdrop: hybrid file encryption CLI
//!
//! Commands:
//!   keygen [--out-dir DIR]                      - create an RSA-4096 key pair (PEM)
//!   encrypt <file> --recipient <pub.pem>        - seal a file for a recipient
//!   decrypt <envelope> [--key <priv.pem>]       - open an envelope addressed to you
//!   inspect <envelope>                          - print envelope header fields
//!   config show                                 - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use sealdrop_core::config::{expand_tilde, SealdropConfig};
use sealdrop_crypto::asymmetric::{PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
use sealdrop_crypto::{
    decrypt_file, encrypt_file, generate_key_pair, import_private, import_public, inspect_file,
    EncryptOptions, EnvelopeHeader, KeySink, ProgressFn, RustCrypto,
};

/// Extension appended to encrypted files
const ENVELOPE_EXT: &str = "sdrp";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealdrop",
    version,
    about = "Client-side hybrid file encryption",
    long_about = "sealdrop: encrypt files for a recipient's RSA public key (chunked AES-256-GCM) and decrypt envelopes addressed to you"
)]
struct Cli {
    /// Path to sealdrop.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SEALDROP_CONFIG",
        default_value = "~/.config/sealdrop/sealdrop.toml"
    )]
    config: PathBuf,

    /// Log level filter (overrides [log].level)
    #[arg(long, env = "SEALDROP_LOG")]
    log: Option<String>,

    /// Log format (overrides [log].format)
    #[arg(long)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate an RSA-4096 key pair and write it as PEM
    Keygen {
        /// Directory for private_key.pem / public_key.pem (default: [keys].dir)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Encrypt a file for a recipient
    Encrypt {
        /// File to encrypt
        file: PathBuf,

        /// Recipient public key (PEM, SPKI)
        #[arg(long, short = 'r')]
        recipient: PathBuf,

        /// Output envelope path (default: <file>.sdrp)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Decrypt an envelope with your private key
    Decrypt {
        /// Envelope to decrypt
        envelope: PathBuf,

        /// Private key (PEM, PKCS#8) (default: [keys].dir/private_key.pem)
        #[arg(long, short = 'k')]
        key: Option<PathBuf>,

        /// Output path (default: stored file name in the output directory)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Show envelope header fields (no key needed)
    Inspect {
        envelope: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = SealdropConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    match cli.command {
        Commands::Keygen { out_dir } => cmd_keygen(&config, out_dir.as_deref()).await,
        Commands::Encrypt {
            file,
            recipient,
            output,
        } => cmd_encrypt(&config, &file, &recipient, output.as_deref()).await,
        Commands::Decrypt {
            envelope,
            key,
            output,
        } => cmd_decrypt(&config, &envelope, key.as_deref(), output.as_deref()).await,
        Commands::Inspect { envelope } => cmd_inspect(&envelope).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Feed chunk-level percentages into a progress bar.
fn progress_observer(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |pct| pb.set_position(u64::from(pct)))
}

// ── Key files ─────────────────────────────────────────────────────────────────

/// Writes exported keys into a directory, owner-only on Unix.
///
/// Refuses to overwrite an existing key file.
struct DirKeySink {
    dir: PathBuf,
}

impl KeySink for DirKeySink {
    fn save(&mut self, name: &str, bytes: &[u8]) -> std::io::Result<()> {
        use std::io::Write;

        let mut opts = std::fs::OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(self.dir.join(name))?;
        file.write_all(bytes)?;
        file.sync_all()
    }
}

/// Fail if any key file already exists in `dir`, before spending time on keygen.
fn ensure_no_existing_keys(dir: &Path) -> Result<()> {
    for name in [PUBLIC_KEY_FILE, PRIVATE_KEY_FILE] {
        let path = dir.join(name);
        if path.exists() {
            anyhow::bail!(
                "refusing to overwrite existing key {} (pass --out-dir to choose another directory)",
                path.display()
            );
        }
    }
    Ok(())
}

/// Claim `path` with an empty placeholder. Creation is atomic, so a file that
/// appears after this point is never silently replaced; the final rename only
/// ever overwrites the placeholder.
fn reserve_output(path: &Path) -> Result<()> {
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => anyhow::bail!(
            "refusing to overwrite {} (pass --output to choose another path)",
            path.display()
        ),
        Err(e) => Err(e).with_context(|| format!("creating output: {}", path.display())),
    }
}

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading key: {}", path.display()))
}

// ── `sealdrop keygen` ─────────────────────────────────────────────────────────

async fn cmd_keygen(config: &SealdropConfig, out_dir: Option<&Path>) -> Result<()> {
    let dir = out_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| expand_tilde(&config.keys.dir));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating key directory: {}", dir.display()))?;
    ensure_no_existing_keys(&dir)?;

    let pb = ProgressBar::new_spinner();
    pb.set_message("generating RSA-4096 key pair...");
    pb.enable_steady_tick(Duration::from_millis(80));
    // RSA-4096 generation takes seconds of CPU; keep it off the runtime threads
    let pair = tokio::task::spawn_blocking(|| generate_key_pair(&RustCrypto))
        .await
        .context("key generation task panicked")?
        .context("generating key pair")?;
    pb.finish_and_clear();

    let mut sink = DirKeySink { dir: dir.clone() };
    pair.backup_to(&mut sink)
        .with_context(|| format!("writing keys to {}", dir.display()))?;

    info!(dir = %dir.display(), bits = pair.public.bits(), "key pair written");
    println!("Key pair written to {}", dir.display());
    println!("  private: {}", dir.join(PRIVATE_KEY_FILE).display());
    println!("  public:  {}", dir.join(PUBLIC_KEY_FILE).display());
    println!();
    println!("Share public_key.pem with senders. Keep private_key.pem secret; it cannot be recovered.");
    Ok(())
}

// ── `sealdrop encrypt` ────────────────────────────────────────────────────────

async fn cmd_encrypt(
    config: &SealdropConfig,
    file: &Path,
    recipient: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let public_key = import_public(&read_pem(recipient)?)
        .with_context(|| format!("importing recipient key: {}", recipient.display()))?;
    let dst = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_envelope_path(file, config.transfer.output_dir.as_deref()));

    let options = EncryptOptions {
        max_file_size: Some(config.transfer.max_file_size),
        file_name: None,
    };

    let pb = make_progress_bar("encrypt");
    pb.set_message(file.display().to_string());
    let summary = encrypt_file(
        &RustCrypto,
        &public_key,
        file,
        &dst,
        &options,
        Some(progress_observer(&pb)),
    )
    .await
    .with_context(|| format!("encrypting {}", file.display()));
    let summary = match summary {
        Ok(s) => s,
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e);
        }
    };
    pb.finish_with_message("done");

    println!("  chunks:   {}", summary.chunks);
    println!("  bytes:    {}", fmt_bytes(summary.bytes));
    println!("  envelope: {}", dst.display());
    Ok(())
}

// ── `sealdrop decrypt` ────────────────────────────────────────────────────────

async fn cmd_decrypt(
    config: &SealdropConfig,
    envelope: &Path,
    key: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let key_path = key
        .map(Path::to_path_buf)
        .unwrap_or_else(|| expand_tilde(&config.keys.dir).join(PRIVATE_KEY_FILE));
    let private_key = import_private(&read_pem(&key_path)?)
        .with_context(|| format!("importing private key: {}", key_path.display()))?;

    let dst = match output {
        Some(p) => p.to_path_buf(),
        None => {
            let header = inspect_file(envelope)
                .await
                .with_context(|| format!("reading envelope header: {}", envelope.display()))?;
            default_plaintext_path(envelope, &header, config.transfer.output_dir.as_deref())
        }
    };
    reserve_output(&dst)?;

    let pb = make_progress_bar("decrypt");
    pb.set_message(envelope.display().to_string());
    let summary = decrypt_file(
        &RustCrypto,
        &private_key,
        envelope,
        &dst,
        Some(progress_observer(&pb)),
    )
    .await
    .with_context(|| format!("decrypting {}", envelope.display()));
    let summary = match summary {
        Ok(s) => s,
        Err(e) => {
            pb.abandon_with_message("failed");
            let _ = std::fs::remove_file(&dst);
            return Err(e);
        }
    };
    pb.finish_with_message("done");

    println!("  chunks: {}", summary.chunks);
    println!("  bytes:  {}", fmt_bytes(summary.bytes));
    println!("  output: {}", dst.display());
    Ok(())
}

// ── `sealdrop inspect` ────────────────────────────────────────────────────────

async fn cmd_inspect(envelope: &Path) -> Result<()> {
    let header = inspect_file(envelope)
        .await
        .with_context(|| format!("reading envelope header: {}", envelope.display()))?;

    println!("Envelope: {}", envelope.display());
    println!("  version:    {}", header.version);
    println!(
        "  file name:  {}",
        header.file_name.as_deref().unwrap_or("(none)")
    );
    println!(
        "  size:       {} ({} bytes)",
        fmt_bytes(header.original_size),
        header.original_size
    );
    println!(
        "  chunks:     {} x {}",
        header.chunk_count,
        fmt_bytes(header.chunk_size)
    );
    println!("  iv:         {}", header.iv);
    println!(
        "  wrapped key: {} bytes",
        header.wrapped_key_bytes().map(|k| k.len()).unwrap_or(0)
    );
    Ok(())
}

// ── `sealdrop config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SealdropConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Output paths ──────────────────────────────────────────────────────────────

/// `<file>.sdrp`, placed in `output_dir` when one is configured.
fn default_envelope_path(file: &Path, output_dir: Option<&Path>) -> PathBuf {
    let mut name = file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "sealdrop".into());
    name.push(".");
    name.push(ENVELOPE_EXT);

    match output_dir {
        Some(dir) => expand_tilde(dir).join(name),
        None => file.with_file_name(name),
    }
}

/// Stored file name if the envelope has a usable one, else the envelope name
/// minus its `.sdrp` extension. Lands in `output_dir` or the current directory.
fn default_plaintext_path(
    envelope: &Path,
    header: &EnvelopeHeader,
    output_dir: Option<&Path>,
) -> PathBuf {
    let name = header.safe_file_name().unwrap_or_else(|| {
        let stem = match envelope.extension() {
            Some(ext) if ext == ENVELOPE_EXT => envelope.file_stem(),
            _ => None,
        };
        stem.map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "sealdrop.out".to_string())
    });

    match output_dir {
        Some(dir) => expand_tilde(dir).join(name),
        None => PathBuf::from(name),
    }
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_named(name: Option<&str>) -> EnvelopeHeader {
        EnvelopeHeader::new(&[0u8; 512], &[0u8; 12], 10, name.map(String::from))
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_encrypt_args() {
        let cli = Cli::try_parse_from([
            "sealdrop",
            "encrypt",
            "report.pdf",
            "--recipient",
            "alice.pem",
        ])
        .unwrap();
        match cli.command {
            Commands::Encrypt {
                file,
                recipient,
                output,
            } => {
                assert_eq!(file, PathBuf::from("report.pdf"));
                assert_eq!(recipient, PathBuf::from("alice.pem"));
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_default_envelope_path() {
        assert_eq!(
            default_envelope_path(Path::new("/data/report.pdf"), None),
            PathBuf::from("/data/report.pdf.sdrp")
        );
        assert_eq!(
            default_envelope_path(Path::new("/data/report.pdf"), Some(Path::new("/out"))),
            PathBuf::from("/out/report.pdf.sdrp")
        );
    }

    #[test]
    fn test_default_plaintext_path_uses_stored_name() {
        let header = header_named(Some("../../etc/passwd"));
        assert_eq!(
            default_plaintext_path(Path::new("x.sdrp"), &header, Some(Path::new("/out"))),
            PathBuf::from("/out/passwd")
        );
    }

    #[test]
    fn test_default_plaintext_path_falls_back_to_stem() {
        let header = header_named(None);
        assert_eq!(
            default_plaintext_path(Path::new("/in/report.pdf.sdrp"), &header, None),
            PathBuf::from("report.pdf")
        );
        assert_eq!(
            default_plaintext_path(Path::new("/in/blob.bin"), &header, None),
            PathBuf::from("sealdrop.out")
        );
    }

    #[test]
    fn test_dir_key_sink_refuses_overwrite() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = DirKeySink {
            dir: tmp.path().to_path_buf(),
        };
        sink.save("public_key.pem", b"first").unwrap();
        assert!(sink.save("public_key.pem", b"second").is_err());
        assert_eq!(
            std::fs::read(tmp.path().join("public_key.pem")).unwrap(),
            b"first"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(tmp.path().join("public_key.pem"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_reserve_output_is_exclusive() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dst = tmp.path().join("report.pdf");

        reserve_output(&dst).unwrap();
        assert!(dst.exists());
        let err = reserve_output(&dst).unwrap_err();
        assert!(err.to_string().contains("refusing to overwrite"));

        std::fs::write(&dst, b"user data").unwrap();
        assert!(reserve_output(&dst).is_err());
        assert_eq!(std::fs::read(&dst).unwrap(), b"user data");
    }

    #[test]
    fn test_existing_public_key_blocks_keygen() {
        let tmp = tempfile::TempDir::new().unwrap();
        ensure_no_existing_keys(tmp.path()).unwrap();

        std::fs::write(tmp.path().join(PUBLIC_KEY_FILE), b"old").unwrap();
        let err = ensure_no_existing_keys(tmp.path()).unwrap_err();
        assert!(err.to_string().contains(PUBLIC_KEY_FILE));
        assert!(!tmp.path().join(PRIVATE_KEY_FILE).exists());
    }

    #[test]
    fn test_fmt_bytes() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
