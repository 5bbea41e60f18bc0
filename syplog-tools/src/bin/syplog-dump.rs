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

//! Drain a log medium into another.
//!
//! Reads records from the input medium (a file by default) until the end of the log, writing
//! each to the output: stdout in text form unless told otherwise. Handy for reading shared
//! memory logs & for converting between encodings.

use syplog::{
    encoder::Encoder,
    error::Result,
    medium::{Direction, Medium, MediumConfig, MediumKind},
};
use syplog_tools::{init_tracing, MediumArgs};

use clap::Parser;

use std::{path::PathBuf, process::ExitCode};

#[derive(Parser)]
#[command(name = "syplog-dump", version, about = "Dump a syplog log")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(flatten)]
    input: MediumArgs,
    /// Output encoding
    #[arg(long, default_value = "text")]
    out_formatter: Encoder,
    /// Write to this file rather than stdout
    #[arg(long)]
    out_file: Option<PathBuf>,
}

fn run(cli: &Cli) -> Result<u64> {
    let mut input = Medium::open(&cli.input.to_config(Direction::Read)?)?;
    let out = match &cli.out_file {
        Some(path) => MediumConfig::builder().kind(MediumKind::File).file_path(path),
        None => MediumConfig::builder().kind(MediumKind::Print),
    };
    let mut output = Medium::open(&out.encoder(cli.out_formatter).build())?;

    let mut count = 0;
    let copied = loop {
        match input.read_record() {
            Ok(Some(rec)) => {
                if let Err(err) = output.write_record(&rec) {
                    break Err(err);
                }
                count += 1;
            }
            Ok(None) => break Ok(count),
            Err(err) => break Err(err),
        }
    };
    let closed_out = output.close();
    let closed_in = input.close();
    let count = copied?;
    closed_out.and(closed_in)?;
    Ok(count)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(&cli) {
        Ok(count) => {
            tracing::info!("dumped {} records", count);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("syplog-dump: {} ({})", err, err.code());
            ExitCode::FAILURE
        }
    }
}

