// ========================================================================================
//
//                      THE INSPECTION TOOL: GTBLOCK
//
// ========================================================================================
//
// A thin command-line front end over the decoder. `info` reports what the header says
// about a file; `counts` walks every block and prints per-variant allele counts, one
// rayon task per block with a forked accessor per worker thread.

use clap::{Parser, Subcommand};
use gtblock::header::RegionSizes;
use gtblock::{GenotypeAccessor, GtbError, LinePosition};
use rayon::prelude::*;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "gtblock",
    version,
    about = "Inspect block-compressed, PBWT-sorted genotype files"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the header, region sizes and sample count of a file
    Info {
        #[arg(value_name = "GENOTYPE_PATH")]
        path: PathBuf,
    },
    /// Print the allele counts of every variant, in file order
    Counts {
        #[arg(value_name = "GENOTYPE_PATH")]
        path: PathBuf,

        /// Number of alleles of every variant (REF included); the file itself does not
        /// record it
        #[arg(long, default_value_t = 2)]
        alleles: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .init();

    let result = match cli.command {
        Commands::Info { path } => run_info(&path),
        Commands::Counts { path, alleles } => run_counts(&path, alleles),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_info(path: &Path) -> Result<(), GtbError> {
    let accessor = GenotypeAccessor::open(path)?;
    let header = accessor.header();
    let samples = accessor.samples()?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    writeln!(out, "File:             {}", path.display())?;
    writeln!(out, "Version:          {}", header.version)?;
    writeln!(out, "Ploidy:           {}", header.ploidy)?;
    writeln!(out, "Samples:          {}", header.num_samples)?;
    writeln!(out, "Haplotypes:       {}", header.hap_samples)?;
    writeln!(out, "Variants:         {}", header.num_variants)?;
    writeln!(out, "Blocks:           {} (block size {})", header.number_of_blocks, header.block_size)?;
    writeln!(out, "Compressed:       {}", if header.compressed { "yes" } else { "no" })?;
    writeln!(
        out,
        "Word widths:      WAH {} bytes, index {} bytes",
        header.wah_width.bytes(),
        header.index_width.bytes()
    )?;
    write_region_sizes(&mut out, &accessor.region_sizes())?;
    if let Some(first) = samples.first() {
        writeln!(out, "First sample:     {first}")?;
    }
    out.flush()?;
    Ok(())
}

fn write_region_sizes(out: &mut impl Write, sizes: &RegionSizes) -> io::Result<()> {
    writeln!(out, "Region sizes (bytes):")?;
    for (name, bytes) in [
        ("header", sizes.header),
        ("block index", sizes.indices),
        ("sample-subset arrays", sizes.ssas),
        ("genotype blocks", sizes.genotypes),
        ("sample list", sizes.samples),
    ] {
        writeln!(out, "  {name:<22}{bytes}")?;
    }
    Ok(())
}

/// Allele counts of every variant of one block, with the position of its first line.
type BlockCounts = Vec<(LinePosition, Vec<usize>)>;

fn run_counts(path: &Path, alleles: usize) -> Result<(), GtbError> {
    if alleles < 2 {
        return Err(GtbError::Precondition(format!(
            "--alleles must be at least 2, got {alleles}"
        )));
    }
    let start_time = Instant::now();
    let accessor = GenotypeAccessor::open(path)?;
    let number_of_blocks = accessor.header().number_of_blocks as usize;
    eprintln!("> Counting alleles over {number_of_blocks} blocks...");

    let blocks: Vec<BlockCounts> = (0..number_of_blocks)
        .into_par_iter()
        .map_init(
            || accessor.fork(),
            |worker, block_id| count_block(worker, block_id, alleles),
        )
        .collect::<Result<_, _>>()?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut variants = 0usize;
    for (position, counts) in blocks.iter().flatten() {
        let counts: Vec<String> = counts.iter().map(usize::to_string).collect();
        writeln!(out, "{}\t{}", position.0, counts.join("\t"))?;
        variants += 1;
    }
    out.flush()?;

    eprintln!(
        "> Counted {variants} variants in {:.2?}.",
        start_time.elapsed()
    );
    Ok(())
}

fn count_block(
    accessor: &mut GenotypeAccessor,
    block_id: usize,
    alleles: usize,
) -> Result<BlockCounts, GtbError> {
    let lines = accessor.block_line_count(block_id)?;
    if lines % (alleles - 1) != 0 {
        log::warn!(
            "Block {block_id} holds {lines} binary lines, not a multiple of {}; trailing lines are skipped",
            alleles - 1
        );
    }

    let mut counts = Vec::with_capacity(lines / (alleles - 1));
    for offset in (0..lines).step_by(alleles - 1) {
        if offset + alleles - 1 > lines {
            break;
        }
        let position = LinePosition::new(block_id, offset);
        let variant = accessor.fill_allele_counts(alleles, position)?.to_vec();
        counts.push((position, variant));
    }
    Ok(counts)
}
