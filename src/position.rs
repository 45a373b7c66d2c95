// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Resolution of reference coordinates to read offsets.

use std::collections::HashMap;

use derive_new::new;

use crate::bam::flags::{MATE_BITS, PILEUP_EXCLUDED};
use crate::bam::{PileupColumn, Record};

/// A reference position visited by the pileup together with the read offset
/// aligned to it. The offset is `None` if the read has a deletion there.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PositionPair {
    pub read_offset: Option<usize>,
    pub ref_pos: i64,
}

/// Find the read offset aligned to `target`.
///
/// Returns `None` if `target` is not in `pairs`. If the read has a gap at
/// `target`, the nearest aligned base is returned, searching towards higher
/// list indices if `search_forward` is set and towards lower indices otherwise.
pub fn find_position(target: i64, pairs: &[PositionPair], search_forward: bool) -> Option<usize> {
    let idx = pairs.iter().position(|pair| pair.ref_pos == target)?;
    if let Some(offset) = pairs[idx].read_offset {
        return Some(offset);
    }
    if search_forward {
        pairs[idx + 1..].iter().find_map(|pair| pair.read_offset)
    } else {
        pairs[..idx].iter().rev().find_map(|pair| pair.read_offset)
    }
}

/// Position tables of all reads piled up over one amplicon, keyed by read
/// name and mate. Built once per pass and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct PositionCache {
    tables: HashMap<(Vec<u8>, u16), Vec<PositionPair>>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the position tables from pileup columns. Secondary,
    /// supplementary, QC failed and duplicate alignments are left out, so
    /// they cannot mix into the table of the primary record of the same name.
    pub fn from_columns<I>(columns: I) -> Self
    where
        I: IntoIterator<Item = PileupColumn>,
    {
        let mut cache = PositionCache::new();
        for column in columns {
            let pos = column.pos();
            for read in column.reads() {
                if read.flags() & PILEUP_EXCLUDED != 0 {
                    continue;
                }
                cache
                    .tables
                    .entry((read.qname().to_vec(), read.flags() & MATE_BITS))
                    .or_default()
                    .push(PositionPair::new(read.qpos(), pos));
            }
        }
        for table in cache.tables.values_mut() {
            table.sort_by_key(|pair| pair.ref_pos);
        }
        cache
    }

    /// Position table of the given read, if the pileup visited it.
    pub fn get(&self, record: &Record) -> Option<&[PositionPair]> {
        self.tables
            .get(&(record.qname().to_vec(), record.flags() & MATE_BITS))
            .map(|table| table.as_slice())
    }

    pub fn insert(&mut self, record: &Record, table: Vec<PositionPair>) {
        self.tables
            .insert((record.qname().to_vec(), record.flags() & MATE_BITS), table);
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bam::testing::record;
    use crate::bam::PileupRead;

    // ref:    10 11 12 13 14 15 16 17
    // offset:  0  1  -  -  2  3  -  4
    fn pairs() -> Vec<PositionPair> {
        vec![
            PositionPair::new(Some(0), 10),
            PositionPair::new(Some(1), 11),
            PositionPair::new(None, 12),
            PositionPair::new(None, 13),
            PositionPair::new(Some(2), 14),
            PositionPair::new(Some(3), 15),
            PositionPair::new(None, 16),
            PositionPair::new(Some(4), 17),
        ]
    }

    #[test]
    fn test_absent_target() {
        assert_eq!(find_position(9, &pairs(), true), None);
        assert_eq!(find_position(18, &pairs(), false), None);
        assert_eq!(find_position(10, &[], true), None);
    }

    #[test]
    fn test_exact_offset() {
        assert_eq!(find_position(11, &pairs(), true), Some(1));
        assert_eq!(find_position(11, &pairs(), false), Some(1));
        assert_eq!(find_position(17, &pairs(), true), Some(4));
    }

    #[test]
    fn test_gap_snaps_in_search_direction() {
        assert_eq!(find_position(12, &pairs(), true), Some(2));
        assert_eq!(find_position(13, &pairs(), false), Some(1));
        assert_eq!(find_position(16, &pairs(), true), Some(4));
        assert_eq!(find_position(16, &pairs(), false), Some(3));
    }

    #[test]
    fn test_gap_at_list_bound() {
        let pairs = vec![
            PositionPair::new(None, 20),
            PositionPair::new(Some(0), 21),
            PositionPair::new(None, 22),
        ];
        assert_eq!(find_position(20, &pairs, false), None);
        assert_eq!(find_position(22, &pairs, true), None);
        assert_eq!(find_position(20, &pairs, true), Some(0));
    }

    #[test]
    fn test_cache_from_columns() {
        let columns = vec![
            PileupColumn::new(
                "chr1".to_owned(),
                6,
                vec![
                    PileupRead::new(b"b".to_vec(), 16, None),
                    PileupRead::new(b"a".to_vec(), 99, Some(1)),
                    PileupRead::new(b"a".to_vec(), 147, Some(0)),
                ],
            ),
            PileupColumn::new(
                "chr1".to_owned(),
                5,
                vec![PileupRead::new(b"a".to_vec(), 99, Some(0))],
            ),
        ];
        let cache = PositionCache::from_columns(columns);
        assert_eq!(cache.len(), 3);

        let a1 = record("a 99 chr1 6 60 2M = 7 3 AC II");
        assert_eq!(
            cache.get(&a1).unwrap(),
            &[PositionPair::new(Some(0), 5), PositionPair::new(Some(1), 6)][..]
        );
        let a2 = record("a 147 chr1 7 60 1M = 6 -3 A I");
        assert_eq!(cache.get(&a2).unwrap(), &[PositionPair::new(Some(0), 6)][..]);
        let b = record("b 16 chr1 5 60 1M1D1M * 0 0 AC II");
        assert_eq!(cache.get(&b).unwrap(), &[PositionPair::new(None, 6)][..]);
        let c = record("c 16 chr1 7 60 1M * 0 0 A I");
        assert!(cache.get(&c).is_none());
    }

    #[test]
    fn test_cache_skips_non_primary_alignments() {
        // these share the name and mate bits of the primary record
        let mut reads: Vec<PileupRead> = [0x100u16, 0x800, 0x200, 0x400, 0x100 | 0x40]
            .iter()
            .map(|&flags| PileupRead::new(b"a".to_vec(), flags, Some(9)))
            .collect();
        reads.push(PileupRead::new(b"a".to_vec(), 0, Some(4)));
        let cache = PositionCache::from_columns(vec![PileupColumn::new(
            "chr1".to_owned(),
            100,
            reads,
        )]);

        assert_eq!(cache.len(), 1);
        let primary = record("a 0 chr1 97 60 10M * 0 0 ACGTACGTAC *");
        assert_eq!(
            cache.get(&primary).unwrap(),
            &[PositionPair::new(Some(4), 100)][..]
        );
    }
}
