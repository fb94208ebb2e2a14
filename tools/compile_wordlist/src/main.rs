//! Compile plain-text frequency lists into the fst word lists the engine
//! loads at runtime.
//!
//! Input lines are whitespace-separated `word frequency` pairs; `#` starts
//! a comment. Words are normalized the same way the engine normalizes
//! typed input, and duplicates keep their highest frequency.
//!
//! Usage:
//!   cargo run -p compile_wordlist -- --language en --out-dir data/wordlists en_50k.txt
//!   cargo run -p compile_wordlist -- --language de --min-frequency 5 base.txt extra.txt

use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::{BufRead, BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fst::MapBuilder;
use softboard_core::utils;

#[derive(Parser, Debug)]
#[command(name = "compile_wordlist")]
#[command(about = "Compile text frequency lists into fst word lists")]
struct Args {
    /// Language code the engine will request, e.g. "en" or "pt-BR"
    #[arg(short, long)]
    language: String,

    /// Directory the compiled `<language>.fst` is written to
    #[arg(short, long, default_value = "data/wordlists")]
    out_dir: PathBuf,

    /// Drop words seen fewer than this many times
    #[arg(long, default_value_t = 1)]
    min_frequency: u64,

    /// Input word lists, merged in order
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut words: BTreeMap<String, u64> = BTreeMap::new();
    let mut read = 0usize;
    let mut malformed = 0usize;
    let mut dropped = 0usize;

    for input in &args.inputs {
        let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            read += 1;
            let mut parts = line.split_whitespace();
            let parsed = (parts.next(), parts.next().and_then(|f| f.parse::<u64>().ok()));
            let (word, frequency) = match parsed {
                (Some(word), Some(frequency)) => (word, frequency),
                _ => {
                    malformed += 1;
                    continue;
                }
            };
            let normalized = utils::normalize(word);
            if normalized.is_empty() || frequency < args.min_frequency {
                dropped += 1;
                continue;
            }
            let slot = words.entry(normalized).or_insert(0);
            *slot = (*slot).max(frequency);
        }
    }

    if words.is_empty() {
        bail!("no usable words in {read} input line(s)");
    }

    create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    let out_path = args.out_dir.join(format!("{}.fst", args.language));
    let writer = BufWriter::new(File::create(&out_path)?);
    // BTreeMap iteration satisfies the sorted-key requirement.
    let mut builder = MapBuilder::new(writer)?;
    for (word, frequency) in &words {
        builder.insert(word, *frequency)?;
    }
    builder.finish()?;

    println!(
        "{}: {} words ({read} lines read, {malformed} malformed, {dropped} dropped)",
        out_path.display(),
        words.len(),
    );
    Ok(())
}
