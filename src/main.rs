use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use log::*;

use memspace::{command::Command, MemorySpace};

/// Size of the memory space when none is given on the command line.
const DEFAULT_MEMORY_SIZE: usize = 100;

fn main() -> Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    // The only argument is the size of the space to manage.
    let max_size = match std::env::args().nth(1) {
        Some(argument) => argument
            .parse()
            .with_context(|| format!("Invalid memory size '{}'.", argument))?,
        None => DEFAULT_MEMORY_SIZE,
    };

    let mut space = MemorySpace::new(max_size);
    info!("Created a memory space of size {}.", max_size);

    // Then, run the commands read from the standard input one line
    // at a time. A bad command is reported and skipped, it does not
    // stop the driver.
    let mut stdout = io::stdout().lock();
    for (number, line) in io::stdin().lock().lines().enumerate() {
        let line = line.context("Failed to read from standard input.")?;

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(error) => {
                warn!("Skipping line {}: {:#}", number + 1, error);
                continue;
            }
        };

        match command.execute(&mut space) {
            Ok(Some(output)) => writeln!(stdout, "{}", output)?,
            Ok(None) => (),
            Err(error) => warn!("Command on line {} failed: {:#}", number + 1, error),
        }
    }

    info!(
        "Done: {} of {} allocated in {} blocks.",
        space.allocated_size(),
        space.max_size(),
        space.allocated_count()
    );
    Ok(())
}
