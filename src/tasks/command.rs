use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;

/// Errors raised by an external transform.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("No command configured")]
    Empty,

    #[error("Couldn't start '{0}': {1}")]
    Spawn(String, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{program}' exited with {status}:\n{stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Pipes `input` through an external program and returns what it printed.
///
/// The first element of `command` is the program, the rest are its arguments.
pub fn pipe(command: &[String], input: &[u8]) -> Result<Vec<u8>, CommandError> {
    let (program, args) = command.split_first().ok_or(CommandError::Empty)?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CommandError::Spawn(program.clone(), e))?;

    // Feed stdin from a separate thread, a child filling up its stdout pipe
    // would otherwise never read the rest of its input.
    let mut stdin = child.stdin.take().ok_or(CommandError::Empty)?;
    let input = input.to_vec();
    let feeder = std::thread::spawn(move || stdin.write_all(&input));

    let output = child.wait_with_output()?;
    let fed = feeder.join();

    if !output.status.success() {
        return Err(CommandError::Failed {
            program: program.clone(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    match fed {
        Ok(result) => result?,
        Err(_) => return Err(std::io::Error::other("stdin writer panicked").into()),
    }

    Ok(output.stdout)
}
