use clap::Parser;
use nxo_loader::NxoFile;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Inspect Nintendo Switch NSO/NRO/KIP executables", version)]
struct Args {
    input: PathBuf,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, serde::Serialize)]
struct FileSummary {
    path: String,
    format: String,
    arch: String,
    name: Option<String>,
    build_id: Option<String>,
    input_sha256: String,
    input_size: u64,
    bss_size: u64,
    needed: Vec<String>,
    sections: Vec<SectionSummary>,
    symbol_count: usize,
    relocation_count: usize,
    plt_entry_count: usize,
    eh_frame_entry_count: usize,
    warnings: Vec<String>,
}

#[derive(Debug, serde::Serialize)]
struct SectionSummary {
    name: String,
    start: u64,
    end: u64,
    kind: String,
}

fn main() {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let bytes = fs::read(&args.input)
        .map_err(|err| format!("read {}: {err}", args.input.display()))?;
    let file = nxo_loader::load(&bytes).map_err(|err| err.to_string())?;
    let summary = summarize(&args.input, &bytes, &file);

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&summary).map_err(|err| err.to_string())?;
        println!("{rendered}");
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn summarize(path: &PathBuf, bytes: &[u8], file: &NxoFile) -> FileSummary {
    FileSummary {
        path: path.display().to_string(),
        format: file.kind.as_str().to_string(),
        arch: if file.armv7 { "arm32" } else { "aarch64" }.to_string(),
        name: file.name(),
        build_id: file.build_id_hex(),
        input_sha256: sha256_hex(bytes),
        input_size: bytes.len() as u64,
        bss_size: file.bss_size,
        needed: file.needed.clone(),
        sections: file
            .sections
            .iter()
            .map(|part| SectionSummary {
                name: part.name.clone(),
                start: part.start,
                end: part.end,
                kind: part.kind.as_str().to_string(),
            })
            .collect(),
        symbol_count: file.symbols.len(),
        relocation_count: file.relocations.len(),
        plt_entry_count: file.plt_entries.len(),
        eh_frame_entry_count: file.eh_table.len(),
        warnings: file.warnings.clone(),
    }
}

fn print_summary(summary: &FileSummary) {
    println!("{}: {} ({})", summary.path, summary.format, summary.arch);
    if let Some(name) = &summary.name {
        println!("name:      {name}");
    }
    if let Some(build_id) = &summary.build_id {
        println!("build id:  {build_id}");
    }
    println!("sha256:    {}", summary.input_sha256);
    println!("size:      {:#x} (bss {:#x})", summary.input_size, summary.bss_size);
    for needed in &summary.needed {
        println!("needs:     {needed}");
    }
    println!(
        "symbols:   {}  relocations: {}  plt: {}  eh_frame: {}",
        summary.symbol_count,
        summary.relocation_count,
        summary.plt_entry_count,
        summary.eh_frame_entry_count
    );
    println!("sections:");
    for section in &summary.sections {
        println!(
            "  {:>10x}..{:<10x} {:<16} {}",
            section.start, section.end, section.name, section.kind
        );
    }
    for warning in &summary.warnings {
        eprintln!("warning: {warning}");
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
