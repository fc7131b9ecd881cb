use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use config::{ClusterConfig, wire};
use serde::de::DeserializeOwned;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(author, version, about, long_about = None)]
/// Cli tool for checking a cluster config
pub struct Args {
    /// path to duet config. We will determine format from extension. If no extension, we will attempt JSON & YAML
    #[clap(short = 'p', long, value_parser)]
    pub path: PathBuf,
    /// print the parsed wire format or the validated internal format
    #[clap(short = 'f', long, value_enum)]
    pub format: Option<Format>,
    /// print the wire format back out as JSON
    #[clap(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Wire,
    Internal,
}

fn main() -> Result<()> {
    let args = Args::parse();
    println!("found config at path = {}", args.path.display());

    let wire_cfg = parse_wire::<wire::Config>(&args)?;
    // validation happens on conversion, so always run it
    let cfg = ClusterConfig::try_from(wire_cfg.clone()).context("config failed validation")?;
    println!(
        "config valid: {} server(s), {} device(s)",
        cfg.servers().len(),
        cfg.devices().len()
    );

    match args.format {
        Some(Format::Wire) => {
            println!("printing wire format");
            println!("{:#?}", wire_cfg);
        }
        Some(Format::Internal) => {
            println!("parsed wire format into duet internal format, pretty printing");
            println!("{:#?}", cfg);
        }
        None => {}
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&wire_cfg)?);
    }

    Ok(())
}

fn parse_wire<T: DeserializeOwned>(args: &Args) -> Result<T> {
    let input = std::fs::read_to_string(&args.path).context("failed to find config")?;

    Ok(match args.path.extension() {
        Some(ext) if ext == "json" => serde_json::from_str(&input)?,
        Some(ext) if ext == "yaml" || ext == "yml" => serde_yaml::from_str(&input)?,
        _ => match serde_json::from_str(&input) {
            Ok(r) => r,
            Err(_err) => {
                println!("failed parsing from json, trying yaml");
                serde_yaml::from_str(&input)?
            }
        },
    })
}
