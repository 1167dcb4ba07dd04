//! Command-line interface for the standalone proxy driver.
//!
//! The driver hosts a single module proxy from a JSON configuration file.
//! It exists for bring-up and soak testing against a real module host: it
//! connects the channels, walks the module through create and start, and
//! either idles until interrupted or feeds stdin lines to the module as
//! gateway messages.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Drive one outprocess module proxy against a module host.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the JSON proxy configuration
    ///
    /// The file describes the module: channel URIs, module host arguments,
    /// lifecycle mode, and queue behavior.
    #[arg(short = 'c', long)]
    pub config: PathBuf,

    /// Forward stdin lines to the module as gateway messages
    ///
    /// Each line becomes the content of one message. Useful for poking a
    /// module host interactively.
    #[arg(long)]
    pub send_stdin: bool,

    /// Run for a fixed time and then destroy the module
    ///
    /// Accepts human-readable durations such as "30s" or "5m". Without
    /// this the driver runs until interrupted.
    #[arg(short = 'd', long, value_parser = parse_duration)]
    pub run_for: Option<Duration>,

    /// Write detailed logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<String>,

    /// Silence user-facing output on stdout
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Increase diagnostic log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse durations like "500ms", "30s", "5m", or "1h". A bare number is
/// taken as seconds.
fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let (value, unit) = match input.find(|c: char| c.is_ascii_alphabetic()) {
        Some(at) => input.split_at(at),
        None => (input, "s"),
    };
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration value: {input}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("unknown duration unit: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse_with_and_without_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
    }

    #[test]
    fn bad_durations_are_rejected() {
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("").is_err());
    }
}
