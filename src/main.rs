//! mobi-unpack - inspect Mobipocket, KF8 and Print Replica books

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mobi_unpack::{BookPart, UnpackOptions, Unpacked, unpack_file};

#[derive(Parser)]
#[command(name = "mobi-unpack")]
#[command(version, about = "Decode Kindle ebook containers", long_about = None)]
#[command(after_help = "EXAMPLES:
    mobi-unpack book.azw3                  Show a summary of the book
    mobi-unpack --json book.mobi           Print parts, resources and NCX as JSON
    mobi-unpack --dump-raw out book.azw3   Write raw markup and section payloads")]
struct Cli {
    /// Input file (MOBI, PRC, AZW, AZW3 or AZW4)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Log header fields, EXTH records and the section map
    #[arg(short, long)]
    verbose: bool,

    /// Print the decoded structure as JSON
    #[arg(long)]
    json: bool,

    /// Print the description of every section
    #[arg(long)]
    sections: bool,

    /// Write raw markup, headers and undecoded sections to DIR
    #[arg(long, value_name = "DIR")]
    dump_raw: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let options = UnpackOptions::new()
        .with_verbose(cli.verbose)
        .with_raw_intermediates(cli.dump_raw.is_some());
    let book = unpack_file(&cli.input, &options).map_err(|e| e.to_string())?;

    if cli.json {
        let json = serde_json::to_string_pretty(&book).map_err(|e| e.to_string())?;
        println!("{json}");
    } else {
        show_summary(&book);
    }

    if cli.sections {
        for (i, note) in book.sections.iter() {
            println!("{i:4}: {}", note.unwrap_or(""));
        }
    }

    if let Some(dir) = &cli.dump_raw {
        book.write_raw(dir).map_err(|e| e.to_string())?;
        println!("Raw data written to {}", dir.display());
    }
    Ok(())
}

fn show_summary(book: &Unpacked) {
    println!("File: {}", book.basename);
    println!("Palm DB type: {}, {} sections", book.ident, book.section_count);
    if let Some(b) = book.boundary {
        println!("Combination file, boundary at section {b}");
    }
    for part in &book.parts {
        show_part(part);
    }
}

fn show_part(part: &BookPart) {
    println!();
    println!("{:?}", part.kind);
    for key in ["Title", "Creator", "Language", "Codec"] {
        if let Some(values) = part.metadata.get(key) {
            println!("  {key}: {}", values.join(", "));
        }
    }
    println!("  Raw markup: {} bytes", part.raw_markup.len());
    println!("  Extracted resources: {}", part.extracted().count());
    if !part.ncx.is_empty() {
        println!("  NCX entries: {}", part.ncx.len());
    }
    if let Some(kf8) = &part.kf8 {
        println!("  Parts: {}, flows: {}", kf8.parts.len(), kf8.flows.len());
        for guide in &part.guide {
            println!("  Guide {}: {}", guide.ref_type, guide.href);
        }
    }
    if let Some(replica) = &part.replica {
        println!("  Print Replica pieces: {}", replica.pieces.len());
    }
    if let Some(page_map) = &part.page_map {
        println!("  Pages: {}", page_map.len());
    }
    for issue in &part.issues {
        println!("  warning: {issue}");
    }
}
