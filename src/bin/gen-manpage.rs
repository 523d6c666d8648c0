//! Man page generator for rdaplink
//!
//! Writes `rdaplink.1` plus one `rdaplink-<command>.1` page per
//! subcommand. The main page also documents the board description file.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

/// Board description format, appended to the main page
const BOARD_FILE_SECTION: &str = r#".SH "BOARD FILE"
Every command takes a TOML board description through \fB\-\-config\fR.
Numbers may be decimal or \fB0x\fR hexadecimal; sizes may also be
strings such as \fB"32 KiB"\fR or \fB"1 MiB"\fR.
.TP
.B [probe]
\fBmode\fR (\fBinterface\fR or \fBbootloader\fR), \fBhdk_id\fR, \fBboard_id\fR
and the strings shown in DETAILS.TXT.
.TP
.B [bootloader], [interface]
\fBstart\fR and \fBsize\fR of the probe's own firmware regions.
.TP
.B [target]
Flash and RAM ranges of the target plus its \fBpage_size\fR and \fBsector_size\fR.
.TP
.B [iap]
\fBpage_size\fR and \fBsector_size\fR of the probe's own flash.
.TP
.B [drive]
\fBsector_size\fR and \fBcluster_size\fR of the emulated drive.
.TP
.B [delays]
\fBconnect_ms\fR, \fBdisconnect_ms\fR and \fBreconnect_ms\fR.
.TP
.B [settings]
Initial \fBauto_reset\fR and \fBautomation_allowed\fR.
"#;

fn render(man: clap_mangen::Man, extra: &str, path: &Path) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    buffer.extend_from_slice(extra.as_bytes());
    fs::write(path, buffer)?;
    println!("Man page generated at: {}", path.display());
    Ok(())
}

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));
    fs::create_dir_all(&output_dir)?;

    let mut cmd = cli::Cli::command();
    cmd.build();
    let name = cmd.get_name().to_string();

    render(
        clap_mangen::Man::new(cmd.clone()),
        BOARD_FILE_SECTION,
        &output_dir.join(format!("{}.1", name)),
    )?;

    for sub in cmd.get_subcommands() {
        let title = format!("{}-{}", name, sub.get_name());
        let man = clap_mangen::Man::new(sub.clone()).title(title.clone());
        render(man, "", &output_dir.join(format!("{}.1", title)))?;
    }

    Ok(())
}
