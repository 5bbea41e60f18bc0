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

//! Reconfigure a running emitter over UDP.
//!
//! ```text
//! syplog-ctl level DEBUG
//! syplog-ctl enable 'NET|CACHE'
//! syplog-ctl --addr 10.0.0.7:12345 disable ALL
//! syplog-ctl ping
//! ```

use syplog::{
    control::{Controller, DEFAULT_ADDR},
    error::Result,
    facility::{Severity, Topics},
};
use syplog_tools::init_tracing;

use clap::{Parser, Subcommand};

use std::{process::ExitCode, time::Duration};

#[derive(Parser)]
#[command(name = "syplog-ctl", version, about = "Control a syplog emitter")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// The listener's address
    #[arg(long, default_value = DEFAULT_ADDR)]
    addr: String,
    /// How long to wait for a ping's echo, in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the listener is up (& has applied everything sent before)
    Ping {
        #[arg(default_value_t = 0)]
        payload: u32,
    },
    /// Set the severity threshold (EMERG ... LOOPS)
    Level { severity: Severity },
    /// Enable topics, e.g. 'NET|CACHE' or ALL
    Enable { topics: Topics },
    /// Disable topics
    Disable { topics: Topics },
}

fn run(cli: &Cli) -> Result<()> {
    let ctl = Controller::new(cli.addr.as_str())?.timeout(Duration::from_millis(cli.timeout_ms));
    match &cli.command {
        Command::Ping { payload } => {
            ctl.ping(*payload)?;
            println!("{} is alive", cli.addr);
            Ok(())
        }
        Command::Level { severity } => ctl.set_level(*severity),
        Command::Enable { topics } => ctl.enable_topics(*topics),
        Command::Disable { topics } => ctl.disable_topics(*topics),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("syplog-ctl: {} ({})", err, err.code());
            ExitCode::FAILURE
        }
    }
}
