use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::memory::MemorySpace;

/// One line of the driver's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `malloc <length>`: allocate and print the base address, or -1.
    Malloc(usize),
    /// `free <address>`: free the block starting at the address.
    Free(usize),
    /// `defrag`: merge adjacent free blocks.
    Defrag,
    /// `print`: print the free and allocated sequences.
    Print,
    /// `stats`: print occupancy figures.
    Stats,
    /// `check`: verify that the blocks partition the space.
    Check,
}

impl Command {
    /// Parses a line of input. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        line.parse().map(Some)
    }

    /// Runs the command against `space` and returns what it prints, if
    /// anything.
    pub fn execute(self, space: &mut MemorySpace) -> Result<Option<String>> {
        let output = match self {
            Command::Malloc(length) => {
                // -1 stands for a failed allocation in the output.
                let address = space
                    .malloc(length)
                    .map_or_else(|| "-1".to_string(), |address| address.to_string());
                Some(address)
            }
            Command::Free(address) => {
                space.free(address)?;
                None
            }
            Command::Defrag => {
                space.defrag();
                None
            }
            Command::Print => Some(space.to_string()),
            Command::Stats => Some(format!(
                "size {}, free {} in {} blocks, allocated {} in {} blocks",
                space.max_size(),
                space.free_size(),
                space.free_count(),
                space.allocated_size(),
                space.allocated_count(),
            )),
            Command::Check => {
                space.validate()?;
                Some("ok".to_string())
            }
        };

        Ok(output)
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or_else(|| anyhow!("empty command"))?;

        let command = match name {
            "malloc" => Command::Malloc(parse_argument(name, words.next())?),
            "free" => Command::Free(parse_argument(name, words.next())?),
            "defrag" => Command::Defrag,
            "print" => Command::Print,
            "stats" => Command::Stats,
            "check" => Command::Check,
            _ => return Err(anyhow!("unknown command '{}'", name)),
        };

        if let Some(extra) = words.next() {
            return Err(anyhow!("unexpected argument '{}' to '{}'", extra, name));
        }

        Ok(command)
    }
}

fn parse_argument(command: &str, argument: Option<&str>) -> Result<usize> {
    let argument = argument.ok_or_else(|| anyhow!("'{}' expects a number", command))?;
    argument
        .parse()
        .with_context(|| format!("invalid argument '{}' to '{}'", argument, command))
}
