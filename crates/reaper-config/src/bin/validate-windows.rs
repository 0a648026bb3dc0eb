//! Window policy validation CLI tool
//!
//! Parses a whitelist/blacklist pair and prints the resulting allowed
//! deletion hours.

use reaper_config::{WindowError, WindowPolicy};
use reaper_util::{SECONDS_PER_DAY, format_duration};
use std::process::ExitCode;
use std::time::Duration;

fn format_offset(seconds: i64) -> String {
    let day = seconds.div_euclid(SECONDS_PER_DAY);
    let within = seconds.rem_euclid(SECONDS_PER_DAY);
    let clock = format!("{:02}:{:02}", within / 3600, (within % 3600) / 60);
    if day > 0 { format!("{clock} (+{day}d)") } else { clock }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let (whitelist, blacklist) = match args.as_slice() {
        [_, whitelist] => (whitelist.as_str(), ""),
        [_, whitelist, blacklist] => (whitelist.as_str(), blacklist.as_str()),
        _ => {
            eprintln!("Usage: validate-windows <whitelist-hours> [blacklist-hours]");
            eprintln!();
            eprintln!("Validates UTC deletion windows and prints the allowed hours.");
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-windows \"09:00 - 12:00, 13:00 - 18:00\" \"10:00 - 11:00\"");
            eprintln!("  validate-windows \"\" \"22:00 - 06:00\"");
            return ExitCode::from(2);
        }
    };

    match WindowPolicy::configure(whitelist, blacklist) {
        Ok(policy) => {
            println!("✓ Window policy is valid");
            println!();
            println!("Allowed hours (UTC):");
            for (start, end) in policy.daily_spans() {
                println!("  - {} - {}", format_offset(start), format_offset(end));
            }
            println!();
            println!(
                "Allowed per day: {} ({}s)",
                format_duration(Duration::from_secs(policy.allowed_seconds_per_day().unsigned_abs())),
                policy.allowed_seconds_per_day()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Window policy is invalid");
            eprintln!();
            match &e {
                WindowError::NoAllowedTime => {
                    eprintln!("The blacklist removes every whitelisted hour; nodes could never be deleted.");
                }
                other => eprintln!("{}", other),
            }
            ExitCode::from(1)
        }
    }
}
