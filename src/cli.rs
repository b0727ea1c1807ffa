//! Line prompt for the SquirrelDB shell.
use std::io::{self, BufRead, Write};

use crate::command::{Command, CommandError};

/// Prompts for and parses one command. End of input reads as [`Command::Exit`].
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> io::Result<Result<Command, CommandError>>
where
    R: BufRead,
    W: Write,
{
    write!(&mut writer, "> ")?;
    writer.flush()?;

    let mut line = String::default();
    if reader.read_line(&mut line)? == 0 {
        return Ok(Ok(Command::Exit));
    }

    Ok(Command::try_from(line.as_str()))
}
