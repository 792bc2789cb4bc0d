use clap::{Parser, Subcommand};
use recbox::codec::CodecId;
use recbox::container::{Reader, ReaderOptions, WriteOptions, DEFAULT_BLOCK_SIZE};
use recbox::datafile;
use recbox::record::Record;
use recbox::recovery;
use recbox::schema::Schema;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "recbox", about = "Schema-driven record container CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write two sample users to a container and read them back
    Demo {
        #[arg(short, long, default_value = "demos/user.avsc")]
        schema: PathBuf,
        #[arg(short, long, default_value = "users_output.rbx")]
        output: PathBuf,
    },
    /// Pack JSON records (one object per line) into a container
    Pack {
        #[arg(short, long)]
        schema: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Codec: none (default), zstd, lz4, brotli, lzma
        #[arg(short, long, default_value = "none")]
        codec: String,
        /// Compression level (zstd 1-19; brotli 0-11; ignored for lz4/lzma)
        #[arg(short, long, default_value = "3")]
        level: i32,
        /// Block size in KiB
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE / 1024)]
        block_size: usize,
        /// JSON lines file
        input: PathBuf,
    },
    /// Print every record as JSON
    Cat {
        input: PathBuf,
        /// Skip damaged blocks instead of stopping
        #[arg(short, long)]
        recover: bool,
    },
    /// Show header metadata and the embedded schema
    Info {
        input: PathBuf,
    },
    /// Grade every block of a container
    Scan {
        input: PathBuf,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Copy every readable record into a fresh container
    Salvage {
        input:  PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value = "none")]
        codec: String,
        #[arg(short, long, default_value = "3")]
        level: i32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {

        // ── Demo ─────────────────────────────────────────────────────────────
        Commands::Demo { schema, output } => {
            let schema = Arc::new(Schema::from_path(&schema)?);

            let mut user1 = Record::new(Arc::clone(&schema));
            user1.set("name", "India")?;
            user1.set("favorite_number", 1947)?;
            // favorite_color stays null

            let mut user2 = Record::new(Arc::clone(&schema));
            user2.set("name", "South Africa")?;
            user2.set("favorite_number", 1992)?;
            user2.set("favorite_color", "green")?;

            let mut writer = datafile::create_file(&output, Arc::clone(&schema), WriteOptions::default())?;
            writer.append(&user1.finalize()?)?;
            writer.append(&user2.finalize()?)?;
            writer.close()?;

            let mut reader = datafile::open_file(&output, ReaderOptions::default())?;
            while reader.has_next()? {
                if let Some(user) = reader.next_record()? {
                    println!("{user}");
                }
            }
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { schema, output, codec, level, block_size, input } => {
            let schema = Arc::new(Schema::from_path(&schema)?);
            let opts = WriteOptions {
                codec:      parse_codec(&codec),
                level,
                block_size: block_size * 1024,
                ..WriteOptions::default()
            };
            let mut writer = datafile::create_file(&output, Arc::clone(&schema), opts)?;
            let lines = std::io::BufReader::new(std::fs::File::open(&input)?).lines();
            let mut count = 0u64;
            for (n, line) in lines.enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let json: serde_json::Value = serde_json::from_str(&line)
                    .map_err(|e| format!("{}:{}: {e}", input.display(), n + 1))?;
                let record = Record::from_json(Arc::clone(&schema), &json)
                    .map_err(|e| format!("{}:{}: {e}", input.display(), n + 1))?;
                writer.append(&record)?;
                count += 1;
            }
            writer.close()?;
            println!("Packed {count} record(s) → {} ({} B)", output.display(), writer.bytes_written());
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { input, recover } => {
            let opts = ReaderOptions { recovery: recover, ..ReaderOptions::default() };
            let mut reader = datafile::open_file(&input, opts)?;
            while let Some(record) = reader.next_record()? {
                println!("{record}");
            }
            let stats = reader.recovery_stats();
            if stats.blocks_skipped > 0 || stats.missing_terminal {
                eprintln!(
                    "skipped {} block(s), {} byte(s){}",
                    stats.blocks_skipped,
                    stats.bytes_skipped,
                    if stats.missing_terminal { "; terminal block missing" } else { "" },
                );
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let reader = Reader::open(std::fs::File::open(&input)?)?;
            let header = reader.header();
            let size = std::fs::metadata(&input)?.len();

            println!("── Container ────────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Size           {size} B");
            println!("  Format version {}", header.version);
            println!("  Codec          {} ({})", header.codec, header.codec.uuid_str());
            println!("  Sync marker    {}", hex::encode(header.sync));
            println!("  Data offset    {} B", reader.offset());
            println!("  Root type      {}", header.schema.name());
            println!("  Schema:");
            println!("{}", serde_json::to_string_pretty(&header.schema.to_json())?);
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { input, json } => {
            let report = recovery::scan_file(&input)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{:>10} {:>10} {:>8}  Health", "Offset", "Length", "Records");
                for block in &report.block_log {
                    let mark = if block.health.is_usable() { "ok".to_owned() } else { format!("{:?}", block.health) };
                    println!("{:>10} {:>10} {:>8}  {mark}", block.offset, block.length, block.records);
                }
                println!("{}", report.summary());
            }
        }

        // ── Salvage ──────────────────────────────────────────────────────────
        Commands::Salvage { input, output, codec, level } => {
            let opts = WriteOptions { codec: parse_codec(&codec), level, ..WriteOptions::default() };
            let (copied, stats) = recovery::salvage_file(&input, &output, opts)?;
            println!(
                "Salvaged {copied} record(s) → {} (skipped {} block(s), {} byte(s))",
                output.display(),
                stats.blocks_skipped,
                stats.bytes_skipped,
            );
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_codec(s: &str) -> CodecId {
    CodecId::from_name(s).unwrap_or_else(|| {
        eprintln!("Unknown codec '{}', defaulting to none", s);
        CodecId::None
    })
}
