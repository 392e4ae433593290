// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

mod args;
mod cmd_mount;
mod cmd_plan;
mod cmd_region;

use clap::Parser;

use crate::args::Opt;

fn main() {
    // because this function exits right away it does not
    // properly handle destruction of data, so we put the actual
    // logic into a separate function/scope
    std::process::exit(main2())
}

fn main2() -> i32 {
    let opt = Opt::parse();
    args::configure_logging(opt.verbose);

    let config = match opt.load_config() {
        Err(err) => {
            tracing::error!(err = ?err, "failed to load config");
            eprintln!("{:?}", miette::Report::new(err));
            return 1;
        }
        Ok(config) => config,
    };

    let result = opt.run(&config);
    args::handle_result(result)
}
