// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", env = "BUSRPC_CONFIG")]
    config: Option<String>,

    /// Keep serving after the walkthrough until a shutdown signal arrives
    #[arg(long, default_value_t = false)]
    serve: bool,
}

impl Args {
    pub fn config(&self) -> Option<&str> {
        self.config.as_deref()
    }

    pub fn serve(&self) -> bool {
        self.serve
    }
}
