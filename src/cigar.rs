// Copyright 2014 Christopher Schröder, Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! CIGAR algebra needed to clip reads without moving the alignment boundary
//! that is kept.
//!
//! The operations extend the CIGAR types of rust-htslib. `=` and `X` count as
//! matches throughout.
//!
//! ```
//! use std::convert::TryFrom;
//!
//! use amptools::cigar::CigarTrim;
//! use rust_htslib::bam::record::CigarString;
//!
//! let cigar = CigarString::try_from("5S100M").unwrap();
//! assert_eq!(cigar.read_len(), 105);
//! assert_eq!(cigar.trim(80, true).unwrap().to_string(), "25H80M");
//! ```

use rust_htslib::bam::record::{Cigar, CigarString};

use crate::errors::{Error, Result};

/// Length arithmetic and trimming on CIGAR strings.
pub trait CigarTrim {
    /// Number of read bases represented by the CIGAR (M, =, X, I and S operations).
    fn read_len(&self) -> u32;

    /// Number of reference bases represented by the CIGAR (M, =, X and D operations).
    fn ref_len(&self) -> u32;

    /// Trim the CIGAR until it represents `n` read bases. The removed bases are
    /// recorded as a hard clip at the trimmed end, merged with any hard clip
    /// already present there. Deletions exposed at the trimmed end are dropped
    /// so that the reported alignment boundary stays on an aligned base.
    ///
    /// With `from_start` the 5' end is trimmed, otherwise the 3' end.
    fn trim(&self, n: u32, from_start: bool) -> Result<CigarString>;
}

fn consumes_read(op: &Cigar) -> bool {
    matches!(
        op,
        Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) | Cigar::Ins(_) | Cigar::SoftClip(_)
    )
}

fn consumes_ref(op: &Cigar) -> bool {
    matches!(
        op,
        Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) | Cigar::Del(_)
    )
}

/// Same operation with a different length.
fn with_len(op: Cigar, len: u32) -> Cigar {
    match op {
        Cigar::Match(_) => Cigar::Match(len),
        Cigar::Ins(_) => Cigar::Ins(len),
        Cigar::Del(_) => Cigar::Del(len),
        Cigar::RefSkip(_) => Cigar::RefSkip(len),
        Cigar::SoftClip(_) => Cigar::SoftClip(len),
        Cigar::HardClip(_) => Cigar::HardClip(len),
        Cigar::Pad(_) => Cigar::Pad(len),
        Cigar::Equal(_) => Cigar::Equal(len),
        Cigar::Diff(_) => Cigar::Diff(len),
    }
}

fn unsupported(cigar: &CigarString, op: Cigar) -> Error {
    Error::UnsupportedCigarOperation {
        op: op.char(),
        cigar: cigar.to_string(),
    }
}

/// Trim the 3' end. Hard clips may only appear as the outermost operations.
fn trim_end(cigar: &CigarString, n: u32) -> Result<CigarString> {
    if let Some(op) = cigar
        .iter()
        .find(|op| matches!(op, Cigar::Pad(_) | Cigar::RefSkip(_)))
    {
        return Err(unsupported(cigar, *op));
    }

    let available = cigar.read_len();
    if n > available {
        return Err(Error::CigarTooShort {
            cigar: cigar.to_string(),
            target: n,
            available,
        });
    }
    let mut to_trim = available - n;
    if to_trim == 0 {
        return Ok(cigar.clone());
    }

    let mut ops: Vec<Cigar> = cigar.iter().copied().collect();
    let start_clip = match ops.first() {
        Some(Cigar::HardClip(_)) => Some(ops.remove(0)),
        _ => None,
    };
    let mut end_clip = match ops.last() {
        Some(Cigar::HardClip(l)) => {
            let l = *l;
            ops.pop();
            l
        }
        _ => 0,
    };
    end_clip += to_trim;

    while to_trim > 0 {
        let op = match ops.last() {
            Some(op) => *op,
            None => break,
        };
        match op {
            Cigar::Match(l)
            | Cigar::Equal(l)
            | Cigar::Diff(l)
            | Cigar::Ins(l)
            | Cigar::SoftClip(l) => {
                if l <= to_trim {
                    to_trim -= l;
                    ops.pop();
                } else {
                    let last = ops.len() - 1;
                    ops[last] = with_len(op, l - to_trim);
                    to_trim = 0;
                }
            }
            Cigar::Del(_) => {
                ops.pop();
            }
            Cigar::HardClip(_) | Cigar::Pad(_) | Cigar::RefSkip(_) => {
                return Err(unsupported(cigar, op));
            }
        }
    }

    // deletions left at the new end would shift the boundary of reversed reads
    while let Some(Cigar::Del(_)) = ops.last() {
        ops.pop();
    }

    let mut trimmed = Vec::with_capacity(ops.len() + 2);
    trimmed.extend(start_clip);
    trimmed.extend(ops);
    trimmed.push(Cigar::HardClip(end_clip));
    let trimmed = CigarString(trimmed);

    let actual = trimmed.read_len();
    if actual != n {
        return Err(Error::CigarTrimPostcondition {
            cigar: trimmed.to_string(),
            expected: n,
            actual,
        });
    }
    Ok(trimmed)
}

impl CigarTrim for CigarString {
    fn read_len(&self) -> u32 {
        self.iter()
            .filter(|op| consumes_read(op))
            .map(|op| op.len())
            .sum()
    }

    fn ref_len(&self) -> u32 {
        self.iter()
            .filter(|op| consumes_ref(op))
            .map(|op| op.len())
            .sum()
    }

    fn trim(&self, n: u32, from_start: bool) -> Result<CigarString> {
        if !from_start {
            return trim_end(self, n);
        }
        let reversed = CigarString(self.iter().rev().copied().collect());
        let trimmed = trim_end(&reversed, n)?;
        Ok(CigarString(trimmed.iter().rev().copied().collect()))
    }
}

/// Remove soft clipped bases from both ends of an alignment. A soft clip is
/// recognised as the outermost operation or directly inside a terminal hard
/// clip. An empty `qual` stays empty.
pub fn remove_soft_clips(
    cigar: &CigarString,
    seq: &[u8],
    qual: &[u8],
) -> (CigarString, Vec<u8>, Vec<u8>) {
    let mut ops: Vec<Cigar> = cigar.iter().copied().collect();
    let (mut head, mut tail) = (0usize, 0usize);

    let first = match ops.first() {
        Some(Cigar::HardClip(_)) => 1,
        _ => 0,
    };
    if let Some(Cigar::SoftClip(l)) = ops.get(first) {
        head = *l as usize;
        ops.remove(first);
    }
    if !ops.is_empty() {
        let last = match ops.last() {
            Some(Cigar::HardClip(_)) if ops.len() > 1 => ops.len() - 2,
            _ => ops.len() - 1,
        };
        if let Some(Cigar::SoftClip(l)) = ops.get(last) {
            tail = *l as usize;
            ops.remove(last);
        }
    }

    let strip = |bases: &[u8]| -> Vec<u8> {
        if bases.is_empty() {
            return Vec::new();
        }
        let end = bases.len().saturating_sub(tail).max(head.min(bases.len()));
        bases[head.min(bases.len())..end].to_vec()
    };
    (CigarString(ops), strip(seq), strip(qual))
}
