//! Print an example configuration file

use crate::config::Config;
use anyhow::Result;

pub fn run() -> Result<()> {
    print!("{}", Config::example());
    Ok(())
}
