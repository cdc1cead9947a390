use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use caper_formats::{parse_node_table, TableLayout};
use clap::Parser;
use memmap2::Mmap;

/// Inspect a compiled dialogue node table and list its branch structure.
#[derive(Parser)]
struct Args {
    /// Path to the node table resource
    path: PathBuf,

    /// Decode the extended (later-title) record layout
    #[arg(long)]
    extended: bool,

    /// Emit the parsed table as JSON instead of a summary listing
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let layout = if args.extended {
        TableLayout::Extended
    } else {
        TableLayout::Classic
    };

    let file = File::open(&args.path)
        .with_context(|| format!("opening node table at {}", args.path.display()))?;
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("memory-mapping {}", args.path.display()))?;

    let nodes = parse_node_table(&mmap, layout)
        .with_context(|| format!("parsing node table {}", args.path.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(());
    }

    println!("{} nodes in {}", nodes.len(), args.path.display());
    for node in &nodes {
        let successors: Vec<String> = node
            .slots
            .iter()
            .filter(|slot| !slot.is_unused())
            .map(|slot| format!("{}@{:#x}", slot.id, slot.script_offset))
            .collect();
        println!(
            "{id:>6}  speaker @{speaker:#06x}  mode {mode:?}  -> [{succ}]",
            id = node.id,
            speaker = node.speaker_offset,
            mode = node.lookup_mode,
            succ = successors.join(", ")
        );
    }

    Ok(())
}
