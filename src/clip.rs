// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Primer clipping of reads assigned to amplicons.
//!
//! A read is cut down to the trim window of its amplicon: bases aligned before
//! the window start and from the window end on are removed and recorded as
//! hard clips. The reference positions of the window edges are resolved to
//! read offsets with the position tables of a pileup over the amplicon, so
//! reads with gaps at the window edges are cut at the nearest aligned base
//! inside the window.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::amplicon::Amplicon;
use crate::bam::flags::PILEUP_EXCLUDED;
use crate::bam::{PileupSource, Read, Record, RecordExt, RecordSink};
use crate::cigar::{remove_soft_clips, CigarTrim};
use crate::errors::{Error, Result};
use crate::position::{find_position, PositionCache};
use crate::stats::StatsSink;
use crate::tags;

/// Clip `record` to the trim window of `amplicon`.
///
/// Returns `None` if the read lies entirely within the primers. The input
/// record is not modified; if nothing needs to be cut, a copy is returned
/// unchanged. Soft clips are removed whenever a cut is made.
pub fn clip<S: StatsSink>(
    record: &Record,
    amplicon: &Amplicon,
    cache: &PositionCache,
    stats: &mut S,
) -> Result<Option<Record>> {
    let pairs = cache.get(record).ok_or_else(|| Error::MissingPositions {
        qname: record.qname_lossy(),
        amplicon: amplicon.id().to_owned(),
    })?;

    let first_base = find_position(amplicon.trim_start(), pairs, true);
    let last_base = find_position(amplicon.trim_end(), pairs, false);
    if first_base.is_none() && last_base.is_none() {
        debug!(
            "excluding {}: no bases within the trim window of {}",
            record.qname_lossy(),
            amplicon.id()
        );
        stats.excluded(amplicon.id());
        return Ok(None);
    }

    let first_base = first_base.filter(|&offset| offset > 0);
    if first_base.is_none() && last_base.is_none() {
        return Ok(Some(record.clone()));
    }

    let (mut cigar, mut seq, mut qual) =
        remove_soft_clips(&record.cigar().take(), &record.seq().as_bytes(), record.qual());
    let mut pos = record.pos();
    let mut last_base = last_base;

    if let Some(first) = first_base {
        let end_pos = record.cigar().end_pos();
        check_offset(record, first, seq.len())?;
        seq = seq.split_off(first);
        qual = qual.split_off(first);
        cigar = cigar.trim(seq.len() as u32, true)?;
        pos = end_pos - i64::from(cigar.ref_len());

        let actual = cigar.clone().into_view(pos).end_pos();
        if actual != end_pos {
            return Err(Error::AlignmentEndMoved {
                qname: record.qname_lossy(),
                amplicon: amplicon.id().to_owned(),
                target: amplicon.trim_start(),
                expected: end_pos,
                actual,
            });
        }
        stats.start_trimmed(amplicon.id());

        last_base = match last_base {
            Some(last) => Some(last.checked_sub(first).ok_or_else(|| {
                Error::OffsetOutOfRange {
                    qname: record.qname_lossy(),
                    offset: last,
                    len: seq.len() + first,
                }
            })?),
            None => None,
        };
    }

    if let Some(last) = last_base {
        check_offset(record, last, seq.len())?;
        seq.truncate(last);
        qual.truncate(last);
        cigar = cigar.trim(last as u32, false)?;
        stats.end_trimmed(amplicon.id());
    }

    if seq.is_empty() {
        debug!(
            "excluding {}: empty after clipping to {}",
            record.qname_lossy(),
            amplicon.id()
        );
        stats.excluded(amplicon.id());
        return Ok(None);
    }

    let mut clipped = record.clone();
    clipped.set(record.qname(), Some(&cigar), &seq, &qual);
    clipped.place(pos);
    Ok(Some(clipped))
}

fn check_offset(record: &Record, offset: usize, len: usize) -> Result<()> {
    if offset > len {
        return Err(Error::OffsetOutOfRange {
            qname: record.qname_lossy(),
            offset,
            len,
        });
    }
    Ok(())
}

/// Why a record naming an amplicon is passed through without clipping:
/// alignments left out of the position tables, and records without a stored
/// sequence.
fn unclippable(record: &Record) -> Option<&'static str> {
    if record.flags() & PILEUP_EXCLUDED != 0 {
        Some("secondary, supplementary, QC failed or duplicate")
    } else if record.seq_len() == 0 {
        Some("no stored sequence")
    } else {
        None
    }
}

/// Counts of a clip pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClipSummary {
    pub records: u64,
    pub clipped: u64,
    pub excluded: u64,
    /// Records without an amplicon tag.
    pub passed_through: u64,
    /// Tagged records written unchanged because they cannot be clipped.
    pub skipped: u64,
}

/// The clip pass: clips records tagged with an amplicon id.
#[derive(Debug, Clone)]
pub struct Clipper {
    amplicons: HashMap<String, Amplicon>,
    caches: HashMap<String, PositionCache>,
}

impl Clipper {
    /// Create a clipper, piling up the reads over each amplicon before any
    /// record is clipped.
    pub fn new<P: PileupSource>(amplicons: Vec<Amplicon>, source: &mut P) -> Result<Self> {
        let mut caches = HashMap::new();
        let mut by_id = HashMap::new();
        for amplicon in amplicons {
            let columns = source.columns(amplicon.chrom(), amplicon.start(), amplicon.end())?;
            let cache = PositionCache::from_columns(columns);
            debug!("{} reads piled up over {}", cache.len(), amplicon.id());
            caches.insert(amplicon.id().to_owned(), cache);
            by_id.insert(amplicon.id().to_owned(), amplicon);
        }
        Ok(Clipper {
            amplicons: by_id,
            caches,
        })
    }

    pub fn amplicon(&self, id: &str) -> Option<&Amplicon> {
        self.amplicons.get(id)
    }

    /// Clip a record to the amplicon named by its `ea` tag. Records without
    /// the tag are returned unchanged, as are secondary, supplementary, QC
    /// failed and duplicate records, records without a stored sequence, and
    /// records naming an unknown amplicon, which are tallied as lookup misses.
    pub fn clip_record<S: StatsSink>(&self, record: &Record, stats: &mut S) -> Result<Option<Record>> {
        let id = match record.aux_text(tags::AMPLICON) {
            Some(id) => id,
            None => return Ok(Some(record.clone())),
        };
        if let Some(reason) = unclippable(record) {
            debug!("passing {} through unclipped: {}", record.qname_lossy(), reason);
            return Ok(Some(record.clone()));
        }
        match (self.amplicons.get(&id), self.caches.get(&id)) {
            (Some(amplicon), Some(cache)) => clip(record, amplicon, cache, stats),
            _ => {
                warn!(
                    "{} names unknown amplicon {}, passing it through",
                    record.qname_lossy(),
                    id
                );
                stats.lookup_miss(&id);
                Ok(Some(record.clone()))
            }
        }
    }

    /// Clip all records of `reader` into `writer`.
    pub fn run<R, W, S>(&self, reader: &mut R, writer: &mut W, stats: &mut S) -> Result<ClipSummary>
    where
        R: Read,
        W: RecordSink,
        S: StatsSink,
    {
        let mut summary = ClipSummary::default();
        let mut record = Record::new();
        while let Some(result) = reader.read(&mut record) {
            result?;
            summary.records += 1;
            if summary.records % 100_000 == 0 {
                info!("clipped {} records", summary.records);
            }
            if record.aux(tags::AMPLICON).is_err() {
                summary.passed_through += 1;
                writer.write(&record)?;
                continue;
            }
            if unclippable(&record).is_some() {
                summary.skipped += 1;
                writer.write(&record)?;
                continue;
            }
            match self.clip_record(&record, stats)? {
                Some(clipped) => {
                    if clipped != record {
                        summary.clipped += 1;
                    }
                    writer.write(&clipped)?;
                }
                None => summary.excluded += 1,
            }
        }
        info!(
            "clip pass done: {} records, {} clipped, {} excluded, {} skipped",
            summary.records, summary.clipped, summary.excluded, summary.skipped
        );
        Ok(summary)
    }
}
