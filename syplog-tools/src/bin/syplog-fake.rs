// Copyright (C) 2022 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of syplog.
//
// syplog is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// mpdpopm is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even
// the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details.
//
// You should have received a copy of the GNU General Public License along with mpdpopm.  If not,
// see <http://www.gnu.org/licenses/>.

//! Generate log traffic.
//!
//! With `--count`, emits that many numbered records (0 for no limit) at the given severity &
//! topics. Otherwise, logs every line read from stdin once at each severity from EMERG through
//! DATA, so that the effect of the emitter's threshold is easy to see.

use syplog::{
    emitter::Emitter,
    error::Result,
    facility::{Severity, Topics},
    medium::Direction,
    syplog,
};
use syplog_tools::{init_tracing, MediumArgs};

use clap::Parser;

use std::{io::BufRead, process::ExitCode, time::Duration};

#[derive(Parser)]
#[command(name = "syplog-fake", version, about = "Generate syplog traffic")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(flatten)]
    output: MediumArgs,
    /// Node name to stamp on each record
    #[arg(long, default_value = "fakelog")]
    node: String,
    /// Initial severity threshold
    #[arg(long, default_value = "LOOPS")]
    threshold: Severity,
    /// Emit this many numbered records rather than reading stdin (0 means forever)
    #[arg(long)]
    count: Option<u64>,
    /// Severity of numbered records
    #[arg(long, default_value = "INFO")]
    severity: Severity,
    /// Topics of numbered records
    #[arg(long, default_value = "LOG")]
    topics: Topics,
    /// Pause between numbered records, in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,
    /// Listen for control messages on this address
    #[arg(long)]
    listen: Option<String>,
}

fn run(cli: &Cli) -> Result<u64> {
    let mut builder = Emitter::builder(cli.node.as_str())
        .medium(cli.output.to_config(Direction::Write)?)
        .severity(cli.threshold)
        .strict(true);
    if let Some(addr) = &cli.listen {
        builder = builder.listen_udp(addr.as_str());
    }
    let mut emitter = builder.open()?;

    let mut emitted = 0;
    let result = match cli.count {
        Some(count) => {
            let interval = Duration::from_millis(cli.interval_ms);
            let mut i = 0u64;
            loop {
                if count != 0 && i >= count {
                    break Ok(());
                }
                if let Err(err) = syplog!(emitter, cli.severity, cli.topics, "record {}", i) {
                    break Err(err);
                }
                emitted += 1;
                i += 1;
                if !interval.is_zero() {
                    std::thread::sleep(interval);
                }
            }
        }
        None => {
            let stdin = std::io::stdin();
            let mut result: Result<()> = Ok(());
            'lines: for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        result = Err(err.into());
                        break;
                    }
                };
                for severity in Severity::iter().take_while(|s| *s <= Severity::Data) {
                    if let Err(err) = syplog!(emitter, severity, Topics::LOG, "{}", line) {
                        result = Err(err);
                        break 'lines;
                    }
                    emitted += 1;
                }
            }
            result
        }
    };
    let closed = emitter.close();
    result?;
    closed?;
    Ok(emitted)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(&cli) {
        Ok(emitted) => {
            tracing::info!("offered {} records", emitted);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("syplog-fake: {} ({})", err, err.code());
            ExitCode::FAILURE
        }
    }
}
