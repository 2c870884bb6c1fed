//! `jlser-dump`: inspect and round-trip jlser streams from the command
//! line. Mirrors the teacher's multi-subcommand dump binary (one `Args`
//! struct carrying an input path plus a `#[command(subcommand)]`), scaled
//! down to this codec's much smaller surface.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use jlser::api;
use jlser::describe::describe;

/// Inspect and round-trip jlser binary streams.
#[derive(Clone, Debug, Parser)]
struct Args {
    /// input stream to read
    #[arg(short, long)]
    input: PathBuf,
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Decode the stream and pretty-print the resulting value tree as YAML
    Dump,
    /// Print the 8-byte stream header's fields
    Header,
    /// Decode the stream, re-encode it, and report whether the two byte
    /// streams match exactly
    Roundtrip,
}

fn main() -> Result<()> {
    let args = Args::parse();
    match args.operation {
        Operation::Dump => dump(&args),
        Operation::Header => header(&args),
        Operation::Roundtrip => roundtrip(&args),
    }
}

fn dump(args: &Args) -> Result<()> {
    let value = api::deserialize_from_file(&args.input)
        .with_context(|| format!("decoding {}", args.input.display()))?;
    let tree = describe(&value);
    println!("{}", serde_yaml_to_string(&tree)?);
    Ok(())
}

fn header(args: &Args) -> Result<()> {
    use jlser::tag::Header;
    let mut input = BufReader::new(File::open(&args.input)?);
    let mut bytes = [0u8; 8];
    std::io::Read::read_exact(&mut input, &mut bytes)?;
    let h = Header::from_bytes(bytes)?;
    println!("version: {}", h.version);
    println!("endianness: {:?}", h.endianness);
    println!("word_size: {:?}", h.word_size);
    Ok(())
}

fn roundtrip(args: &Args) -> Result<()> {
    let original = std::fs::read(&args.input)?;
    let value = api::deserialize(std::io::Cursor::new(&original))
        .with_context(|| format!("decoding {}", args.input.display()))?;
    let mut reencoded = Vec::new();
    api::serialize(&mut reencoded, &value)?;
    if reencoded == original {
        println!("roundtrip OK: {} bytes", reencoded.len());
    } else {
        println!(
            "roundtrip MISMATCH: {} bytes in, {} bytes out",
            original.len(),
            reencoded.len()
        );
    }
    Ok(())
}

fn serde_yaml_to_string<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_yaml::to_string(value)?)
}
