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

//! Command-line plumbing shared by the syplog tools.

use syplog::{
    encoder::Encoder,
    error::Result,
    medium::{Direction, MediumConfig, MediumKind, DEFAULT_FILE_PATH, DEFAULT_SHM_KEY},
};

use std::path::PathBuf;

/// The options that describe one medium
#[derive(clap::Args, Clone, Debug)]
pub struct MediumArgs {
    /// Medium type: file, shm, print or null
    #[arg(long, default_value = "file")]
    pub medium: MediumKind,
    /// Record encoding: binary or text
    #[arg(long, default_value = "binary")]
    pub formatter: Encoder,
    /// read or write; each tool has its own default
    #[arg(long)]
    pub operation: Option<Direction>,
    /// Bound on the log's size, with an optional K, M or G suffix (0 means unbounded)
    #[arg(long)]
    pub log_size: Option<String>,
    /// Log file, for the file medium
    #[arg(long, default_value = DEFAULT_FILE_PATH)]
    pub log_file: PathBuf,
    /// System V IPC key, for the shm medium
    #[arg(long, default_value_t = DEFAULT_SHM_KEY)]
    pub shm_key: i32,
}

impl MediumArgs {
    pub fn to_config(&self, default_direction: Direction) -> Result<MediumConfig> {
        let mut builder = MediumConfig::builder()
            .kind(self.medium)
            .encoder(self.formatter)
            .direction(self.operation.unwrap_or(default_direction))
            .file_path(self.log_file.clone())
            .shm_key(self.shm_key);
        if let Some(size) = &self.log_size {
            builder = builder.length(size)?;
        }
        Ok(builder.build())
    }
}

/// Send the tools' own diagnostics to stderr; each `-v` raises the level by one.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod test {
    use super::*;

    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        medium: MediumArgs,
    }

    #[test]
    fn medium_options() {
        let cli = Cli::try_parse_from(["t"]).unwrap();
        let cfg = cli.medium.to_config(Direction::Read).unwrap();
        assert_eq!(cfg.kind(), MediumKind::File);
        assert_eq!(cfg.encoder(), Encoder::Binary);
        assert_eq!(cfg.direction(), Direction::Read);
        assert_eq!(cfg.length(), 0);
        assert_eq!(cfg.file_path(), std::path::Path::new(DEFAULT_FILE_PATH));

        let cli = Cli::try_parse_from([
            "t",
            "--medium",
            "shm",
            "--formatter",
            "text",
            "--operation",
            "write",
            "--log-size",
            "8K",
            "--shm-key",
            "77",
        ])
        .unwrap();
        let cfg = cli.medium.to_config(Direction::Read).unwrap();
        assert_eq!(cfg.kind(), MediumKind::Shm);
        assert_eq!(cfg.encoder(), Encoder::Text);
        assert_eq!(cfg.direction(), Direction::Write);
        assert_eq!(cfg.length(), 8192);
        assert_eq!(cfg.shm_key(), 77);

        assert!(Cli::try_parse_from(["t", "--medium", "tape"]).is_err());
        let cli = Cli::try_parse_from(["t", "--log-size", "lots"]).unwrap();
        assert!(cli.medium.to_config(Direction::Write).is_err());
    }
}
