//! Man page generator for bpmcu
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]
//!
//! Writes `bpmcu.1` plus one page per subcommand (`bpmcu-update.1`, ...).

use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

fn render(cmd: clap::Command, path: &Path) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd).render(&mut buffer)?;
    fs::write(path, buffer)
}

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));
    fs::create_dir_all(&output_dir)?;

    let cmd = cli::Cli::command();
    for sub in cmd.get_subcommands() {
        let name = format!("bpmcu-{}", sub.get_name());
        let page = output_dir.join(format!("{}.1", name));
        render(sub.clone(), &page)?;
    }

    let main_page = output_dir.join("bpmcu.1");
    render(cmd, &main_page)?;

    println!("Man pages generated in: {}", output_dir.display());
    println!("\nTo view the man page:");
    println!("  man -l {}", main_page.display());
    println!("\nTo install system-wide (requires sudo):");
    println!(
        "  sudo cp {}/*.1 /usr/local/share/man/man1/",
        output_dir.display()
    );
    println!("  sudo mandb");

    Ok(())
}
