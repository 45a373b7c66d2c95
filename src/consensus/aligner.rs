// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Multiple sequence alignment of duplicate reads.

use std::io::{self, Write as _};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::errors::{Error, Result};

/// Gap character of aligned rows.
pub const GAP: u8 = b'-';

const MUSCLE_ARGS: [&str; 6] = ["-in", "-", "-out", "-", "-quiet", "-clwstrict"];
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Capability to align the sequences of a duplicate group.
///
/// Implementations return one gapped row per input sequence, in input order,
/// all of the same length. Closures of the matching signature implement the
/// trait, which allows deterministic aligners in tests.
pub trait ConsensusAligner {
    fn align(&self, sequences: &[&[u8]]) -> Result<Vec<Vec<u8>>>;
}

impl<F> ConsensusAligner for F
where
    F: Fn(&[&[u8]]) -> Result<Vec<Vec<u8>>>,
{
    fn align(&self, sequences: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        self(sequences)
    }
}

/// Check that `rows` is an alignment of `n` sequences.
pub fn check_alignment(rows: &[Vec<u8>], n: usize) -> Result<()> {
    if rows.len() != n {
        return Err(Error::AlignmentParse {
            msg: format!("expected {} aligned rows, got {}", n, rows.len()),
        });
    }
    if let Some(first) = rows.first() {
        if rows.iter().any(|row| row.len() != first.len()) {
            return Err(Error::AlignmentParse {
                msg: "aligned rows differ in length".to_owned(),
            });
        }
    }
    Ok(())
}

/// Aligns sequences by their first base, padding shorter ones with gaps at
/// the end.
#[derive(Debug, Clone, Copy, Default)]
pub struct UngappedAligner;

impl ConsensusAligner for UngappedAligner {
    fn align(&self, sequences: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let width = sequences.iter().map(|seq| seq.len()).max().unwrap_or(0);
        Ok(sequences
            .iter()
            .map(|seq| {
                let mut row = seq.to_vec();
                row.resize(width, GAP);
                row
            })
            .collect())
    }
}

/// Runs MUSCLE, feeding the sequences as FASTA on stdin and reading a strict
/// CLUSTAL alignment from stdout. The process is killed if it does not finish
/// within the timeout.
#[derive(Debug, Clone)]
pub struct MuscleAligner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Default for MuscleAligner {
    fn default() -> Self {
        MuscleAligner::new("muscle", Duration::from_secs(300))
    }
}

impl MuscleAligner {
    pub fn new(program: &str, timeout: Duration) -> Self {
        MuscleAligner {
            program: program.to_owned(),
            args: MUSCLE_ARGS.iter().map(|arg| (*arg).to_owned()).collect(),
            timeout,
        }
    }

    /// Replace the command line arguments.
    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|arg| (*arg).to_owned()).collect();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn failed(&self, status: &str, stderr: &[u8]) -> Error {
        Error::AlignerFailed {
            program: self.program.clone(),
            status: status.to_owned(),
            stderr: String::from_utf8_lossy(stderr).trim().to_owned(),
        }
    }

    /// An I/O error while talking to the aligner process. It fails the group
    /// like a non-zero exit.
    fn io_failed(&self, context: &str, err: io::Error) -> Error {
        self.failed(&format!("{}: {}", context, err), b"")
    }
}

impl ConsensusAligner for MuscleAligner {
    fn align(&self, sequences: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::AlignerSpawn {
                program: self.program.clone(),
                source,
            })?;

        let fasta = to_fasta(sequences);
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || -> io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&fasta)?;
            }
            Ok(())
        });
        let stdout = child.stdout.take();
        let stdout_reader = thread::spawn(move || read_pipe(stdout));
        let stderr = child.stderr.take();
        let stderr_reader = thread::spawn(move || read_pipe(stderr));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            let polled = child
                .try_wait()
                .map_err(|err| self.io_failed("waiting for the process", err))?;
            if let Some(status) = polled {
                break Some(status);
            }
            if Instant::now() >= deadline {
                // a kill failure means the process exited meanwhile
                let _ = child.kill();
                child
                    .wait()
                    .map_err(|err| self.io_failed("waiting for the killed process", err))?;
                break None;
            }
            thread::sleep(POLL_INTERVAL);
        };

        let written = writer.join();
        let stdout = stdout_reader.join();
        let stderr = stderr_reader.join();
        let status = match status {
            Some(status) => status,
            None => {
                return Err(Error::AlignerTimeout {
                    program: self.program.clone(),
                    timeout: self.timeout,
                })
            }
        };

        let stderr = match stderr {
            Ok(Ok(stderr)) => stderr,
            _ => Vec::new(),
        };
        if !status.success() {
            return Err(self.failed(&status.to_string(), &stderr));
        }
        match written {
            Ok(Ok(())) => (),
            Ok(Err(err)) => return Err(self.io_failed("writing sequences", err)),
            Err(_) => return Err(self.failed("stdin writer panicked", &stderr)),
        }
        let stdout = match stdout {
            Ok(stdout) => stdout.map_err(|err| self.io_failed("reading the alignment", err))?,
            Err(_) => return Err(self.failed("stdout reader panicked", &stderr)),
        };
        debug!(
            "{} aligned {} sequences into {} bytes of output",
            self.program,
            sequences.len(),
            stdout.len()
        );
        parse_clustal(&String::from_utf8_lossy(&stdout), sequences.len())
    }
}

fn read_pipe<R: io::Read>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

/// FASTA records named by the index of each sequence.
fn to_fasta(sequences: &[&[u8]]) -> Vec<u8> {
    let mut fasta = Vec::new();
    for (i, seq) in sequences.iter().enumerate() {
        fasta.extend(format!(">{}\n", i).into_bytes());
        fasta.extend_from_slice(seq);
        fasta.push(b'\n');
    }
    fasta
}

/// Parse a CLUSTAL alignment of `n` sequences named `0..n`. Rows are returned
/// in name order, whatever order the blocks list them in.
pub fn parse_clustal(text: &str, n: usize) -> Result<Vec<Vec<u8>>> {
    let invalid = |msg: String| Error::AlignmentParse { msg };
    let mut lines = text.lines().skip_while(|line| line.trim().is_empty());
    match lines.next() {
        Some(line) if line.starts_with("CLUSTAL") => (),
        other => {
            return Err(invalid(format!(
                "expected CLUSTAL header, got {:?}",
                other.unwrap_or("")
            )))
        }
    }

    let mut rows = vec![Vec::new(); n];
    for line in lines {
        // blank and conservation lines
        if line.trim().is_empty() || line.starts_with(char::is_whitespace) {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (name, seq) = match (fields.next(), fields.next()) {
            (Some(name), Some(seq)) => (name, seq),
            _ => return Err(invalid(format!("malformed alignment line {:?}", line))),
        };
        let idx: usize = name
            .parse()
            .map_err(|_| invalid(format!("unexpected sequence name {}", name)))?;
        let row = rows
            .get_mut(idx)
            .ok_or_else(|| invalid(format!("unexpected sequence name {}", name)))?;
        row.extend(seq.bytes());
    }
    if let Some(idx) = rows.iter().position(|row| row.is_empty()) {
        return Err(invalid(format!("sequence {} missing from alignment", idx)));
    }
    check_alignment(&rows, n)?;
    Ok(rows)
}
