// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

use derive_new::new;
use rust_htslib::bam::{self, Read as _};

use crate::errors::Result;

/// Source of pileups over a region.
pub trait PileupSource {
    /// Pileup columns over the 0-based, half-open interval `[start, end)` of
    /// `contig`, in position order. Columns without reads are omitted, as is
    /// a contig the source does not know.
    fn columns(&mut self, contig: &str, start: i64, end: i64) -> Result<Vec<PileupColumn>>;
}

/// A pileup over one genomic position.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct PileupColumn {
    contig: String,
    pos: i64,
    reads: Vec<PileupRead>,
}

impl PileupColumn {
    pub fn contig(&self) -> &str {
        &self.contig
    }

    pub fn pos(&self) -> i64 {
        self.pos
    }

    pub fn depth(&self) -> usize {
        self.reads.len()
    }

    pub fn reads(&self) -> &[PileupRead] {
        &self.reads
    }
}

/// An aligned read in a pileup column.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct PileupRead {
    qname: Vec<u8>,
    flags: u16,
    qpos: Option<usize>,
}

impl PileupRead {
    pub fn qname(&self) -> &[u8] {
        &self.qname
    }

    /// Flags of the aligned record.
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Position within the read, not counting soft clipped bases.
    /// None if the read has a deletion or skip at this position.
    pub fn qpos(&self) -> Option<usize> {
        self.qpos
    }

    /// Whether there is a deletion in the alignment at this position.
    pub fn is_del(&self) -> bool {
        self.qpos.is_none()
    }
}

impl PileupSource for bam::IndexedReader {
    fn columns(&mut self, contig: &str, start: i64, end: i64) -> Result<Vec<PileupColumn>> {
        if self.header().tid(contig.as_bytes()).is_none() {
            return Ok(Vec::new());
        }
        self.fetch((contig, start, end))?;

        let mut pileups = self.pileup();
        pileups.set_max_depth(1_000_000);
        let mut columns = Vec::new();
        for pileup in pileups {
            let pileup = pileup?;
            let pos = i64::from(pileup.pos());
            if pos < start || pos >= end {
                continue;
            }
            let reads = pileup
                .alignments()
                .map(|alignment| {
                    let record = alignment.record();
                    // htslib counts soft clipped bases in the query position
                    let clipped = record.cigar().leading_softclips() as usize;
                    PileupRead::new(
                        record.qname().to_vec(),
                        record.flags(),
                        alignment.qpos().map(|qpos| qpos - clipped),
                    )
                })
                .collect();
            columns.push(PileupColumn::new(contig.to_owned(), pos, reads));
        }
        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bam::testing::{indexed_bam, record};

    #[test]
    fn test_pileup() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = indexed_bam(
            dir.path(),
            &[
                record("a 0 chr1 11 60 2S3M2D2M * 0 0 GGACGTA *"),
                record("b 256 chr1 13 60 4M * 0 0 ACGT *"),
            ],
        );

        let columns = reader.columns("chr1", 11, 16).unwrap();
        let positions: Vec<_> = columns.iter().map(|c| c.pos()).collect();
        assert_eq!(positions, vec![11, 12, 13, 14, 15]);
        assert_eq!(columns[0].depth(), 1);
        assert_eq!(columns[0].reads()[0].qpos(), Some(1));
        // a has a deletion at 13 and 14
        assert_eq!(columns[2].depth(), 2);
        let a = &columns[2].reads()[0];
        let b = &columns[2].reads()[1];
        assert_eq!(a.qname(), b"a");
        assert!(a.is_del());
        assert_eq!(b.qpos(), Some(1));
        assert_eq!(b.flags(), 256);
        assert_eq!(columns[4].reads()[0].qpos(), Some(3));
        assert_eq!(columns[4].contig(), "chr1");
    }

    #[test]
    fn test_unknown_contig() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = indexed_bam(dir.path(), &[record("a 0 chr1 11 60 4M * 0 0 ACGT *")]);
        assert!(reader.columns("chr2", 0, 100).unwrap().is_empty());
        assert!(reader.columns("chr1", 100, 200).unwrap().is_empty());
    }
}
