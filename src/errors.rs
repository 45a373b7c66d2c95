// Copyright 2014 Christopher Schröder, Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Generic result type for functions in this crate with
/// a global error class.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    // General errors
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Htslib(#[from] rust_htslib::errors::Error),

    // Errors for CIGAR handling
    #[error("unsupported CIGAR operation {op} in {cigar}")]
    UnsupportedCigarOperation { op: char, cigar: String },
    #[error("trimmed CIGAR {cigar} represents {actual} read bases, expected {expected}")]
    CigarTrimPostcondition {
        cigar: String,
        expected: u32,
        actual: u32,
    },
    #[error("cannot trim CIGAR {cigar} to {target} read bases, it only has {available}")]
    CigarTooShort {
        cigar: String,
        target: u32,
        available: u32,
    },

    // Errors for clipping
    #[error(
        "clipping {qname} against amplicon {amplicon} at {target} moved alignment end from {expected} to {actual}"
    )]
    AlignmentEndMoved {
        qname: String,
        amplicon: String,
        target: i64,
        expected: i64,
        actual: i64,
    },
    #[error("no position table for {qname} in the pileup of amplicon {amplicon}")]
    MissingPositions { qname: String, amplicon: String },
    #[error("read offset {offset} of {qname} lies outside its {len} aligned bases")]
    OffsetOutOfRange {
        qname: String,
        offset: usize,
        len: usize,
    },

    // Errors for amplicon designs
    #[error("invalid region {region} (expected chrom:start-end)")]
    InvalidRegion { region: String },
    #[error("amplicon design line {line}: missing column {column}")]
    MissingColumn { line: usize, column: String },
    #[error("amplicon {id}: trim region {trim} is not contained in amplicon {amplicon}")]
    TrimOutsideAmplicon {
        id: String,
        amplicon: String,
        trim: String,
    },
    #[error("duplicate amplicon id {id}")]
    DuplicateAmplicon { id: String },
    #[error("header amplicon record is missing tag {tag}")]
    HeaderAmpliconTag { tag: String },

    // Errors for annotation
    #[error("annotation of {qname} failed: {reason}")]
    Annotation { qname: String, reason: String },
    #[error("invalid adaptor layout {layout}: {msg}")]
    InvalidAdaptorLayout { layout: String, msg: String },

    // Errors for variant observations
    #[error("invalid variant at {pos}: {msg}")]
    InvalidVariant { pos: i64, msg: String },

    // Errors for the consensus aligner
    #[error("failed to start aligner {program}: {source}")]
    AlignerSpawn {
        program: String,
        source: std::io::Error,
    },
    #[error("aligner {program} exited with {status}: {stderr}")]
    AlignerFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("aligner {program} did not finish within {timeout:?}")]
    AlignerTimeout { program: String, timeout: Duration },
    #[error("error parsing alignment: {msg}")]
    AlignmentParse { msg: String },
}

impl Error {
    /// Whether the error signals a logic or data-integrity defect rather than
    /// an expected condition or a collaborator failure.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedCigarOperation { .. }
                | Error::CigarTrimPostcondition { .. }
                | Error::CigarTooShort { .. }
                | Error::AlignmentEndMoved { .. }
                | Error::OffsetOutOfRange { .. }
        )
    }

    /// Whether the error comes from the external consensus aligner.
    pub fn is_aligner_failure(&self) -> bool {
        matches!(
            self,
            Error::AlignerSpawn { .. }
                | Error::AlignerFailed { .. }
                | Error::AlignerTimeout { .. }
                | Error::AlignmentParse { .. }
        )
    }
}
