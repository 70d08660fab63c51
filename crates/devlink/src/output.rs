use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use devlink_device::{DirEntry, ProgramStatus, ResourceInfo, SyncReport};
use devlink_frame::ChannelTable;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn print_status(status: &ProgramStatus, format: OutputFormat) {
    let exit_code = status
        .exit_code
        .map_or_else(|| "-".to_string(), |code| code.to_string());
    match format {
        OutputFormat::Json => print_json(status),
        OutputFormat::Table => {
            let mut table = new_table(vec!["RUNNING", "EXIT CODE", "STATUS"]);
            table.add_row(vec![status.running.to_string(), exit_code, status.status.clone()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Program status:");
            println!("  Running:   {}", status.running);
            println!("  Exit code: {exit_code}");
            println!("  Status:    {}", status.status);
        }
        OutputFormat::Raw => println!("{}", status.status),
    }
}

/// One value per line; JSON prints an array.
pub fn print_lines(lines: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(lines),
        _ => {
            for line in lines {
                println!("{line}");
            }
        }
    }
}

pub fn print_entries(entries: &[DirEntry], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(entries),
        OutputFormat::Table => {
            let mut table = new_table(vec!["NAME", "TYPE"]);
            for entry in entries {
                table.add_row(vec![entry.name.clone(), kind(entry).to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for entry in entries {
                let suffix = if entry.is_dir { "/" } else { "" };
                println!("{}{suffix}", entry.name);
            }
        }
    }
}

fn kind(entry: &DirEntry) -> &'static str {
    if entry.is_dir {
        "dir"
    } else {
        "file"
    }
}

pub fn print_resources(resources: &[ResourceInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(resources),
        OutputFormat::Table => {
            let mut table = new_table(vec!["NAME", "SIZE"]);
            for res in resources {
                table.add_row(vec![res.name.clone(), res.size.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for res in resources {
                println!("{} ({} bytes)", res.name, res.size);
            }
        }
    }
}

pub fn print_report(report: &SyncReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = new_table(vec!["UPLOADED", "DELETED", "UNCHANGED", "FAILED"]);
            table.add_row(vec![
                report.uploaded.to_string(),
                report.deleted.to_string(),
                report.unchanged.to_string(),
                report.failed.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => println!(
            "Files synced, {} uploaded, {} deleted, {} unchanged, {} failed",
            report.uploaded, report.deleted, report.unchanged, report.failed
        ),
    }
}

#[derive(Serialize)]
struct ConfigOutput<'a, T: Serialize> {
    namespace: &'a str,
    name: &'a str,
    value: T,
}

pub fn print_config_value<T: Serialize + std::fmt::Display>(
    namespace: &str,
    name: &str,
    value: T,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(&ConfigOutput {
            namespace,
            name,
            value,
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["NAMESPACE", "NAME", "VALUE"]);
            table.add_row(vec![namespace.to_string(), name.to_string(), value.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{namespace}/{name} = {value}"),
        OutputFormat::Raw => println!("{value}"),
    }
}

/// Confirmation line for commands that only succeed or fail.
pub fn print_done(action: &str, target: &str, format: OutputFormat) {
    #[derive(Serialize)]
    struct Done<'a> {
        action: &'a str,
        target: &'a str,
        ok: bool,
    }
    match format {
        OutputFormat::Json => print_json(&Done {
            action,
            target,
            ok: true,
        }),
        OutputFormat::Raw => {}
        _ if target.is_empty() => println!("{action}: ok"),
        _ => println!("{action} {target}: ok"),
    }
}

#[derive(Serialize)]
struct StreamOutput<'a> {
    channel: u8,
    channel_name: &'a str,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

/// Print one chunk received on a device output stream.
pub fn print_stream_chunk(channels: &ChannelTable, channel: u8, data: &[u8], format: OutputFormat) {
    let name = channels.channel_name(channel);
    match format {
        OutputFormat::Json => print_json(&StreamOutput {
            channel,
            channel_name: name,
            payload_size: data.len(),
            payload: payload_preview(data),
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table | OutputFormat::Pretty => {
            let text = payload_preview(data);
            for line in text.lines() {
                println!("[{name}] {line}");
            }
        }
        OutputFormat::Raw => print_raw(data),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
