// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Assignment of reads to amplicons by the proximity of their alignment
//! boundaries to the amplicon edges.

use bio_types::strand::Strand;
use log::trace;

use crate::amplicon::Amplicon;
use crate::bam::{HeaderView, Record, RecordExt};
use crate::stats::StatsSink;

/// How reads are matched against amplicons without a strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnstrandedRule {
    /// Forward reads must start near the amplicon start, reverse reads must
    /// end near the amplicon end.
    OrientationGated,
    /// Either read boundary near its amplicon edge matches, whatever the
    /// read orientation.
    EitherEdge,
}

impl Default for UnstrandedRule {
    fn default() -> Self {
        UnstrandedRule::OrientationGated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    /// A boundary is near an edge if it is less than this many bases away.
    pub offset_allowed: i64,
    pub unstranded_rule: UnstrandedRule,
}

impl Default for MatchOptions {
    fn default() -> Self {
        MatchOptions {
            offset_allowed: 10,
            unstranded_rule: UnstrandedRule::default(),
        }
    }
}

/// Matches reads against amplicons. Record contigs are resolved by the
/// target names of the header the reads come with.
#[derive(Debug, Clone)]
pub struct AmpliconMatcher {
    options: MatchOptions,
    targets: Vec<String>,
}

impl AmpliconMatcher {
    pub fn new(options: MatchOptions, header: &HeaderView) -> Self {
        AmpliconMatcher {
            options,
            targets: header
                .target_names()
                .iter()
                .map(|name| String::from_utf8_lossy(name).into_owned())
                .collect(),
        }
    }

    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    /// Name of the contig the record is aligned to.
    pub fn contig(&self, record: &Record) -> Option<&str> {
        if record.tid() < 0 {
            return None;
        }
        self.targets.get(record.tid() as usize).map(String::as_str)
    }

    /// Whether the read stems from the amplicon. Unmapped reads and reads on
    /// another contig never match.
    pub fn matches(&self, record: &Record, amplicon: &Amplicon) -> bool {
        if record.is_unmapped() || self.contig(record) != Some(amplicon.chrom()) {
            return false;
        }
        let offset = self.options.offset_allowed;
        let start_near = (record.pos() - amplicon.start()).abs() < offset;
        let end_near = (record.cigar().end_pos() - amplicon.end()).abs() < offset;
        let reverse = record.is_reverse();

        match amplicon.strand() {
            Strand::Forward => !reverse && start_near,
            Strand::Reverse => reverse && end_near,
            Strand::Unknown => match self.options.unstranded_rule {
                UnstrandedRule::OrientationGated => {
                    (!reverse && start_near) || (reverse && end_near)
                }
                UnstrandedRule::EitherEdge => start_near || end_near,
            },
        }
    }

    /// The first amplicon in `amplicons` the read matches. The match is
    /// reported to `stats`.
    pub fn find<'a, S: StatsSink>(
        &self,
        record: &Record,
        amplicons: &'a [Amplicon],
        stats: &mut S,
    ) -> Option<&'a Amplicon> {
        let found = amplicons.iter().find(|amplicon| self.matches(record, amplicon));
        match found {
            Some(amplicon) => {
                trace!("{} matches {}", record.qname_lossy(), amplicon.id());
                stats.matched(amplicon.id());
            }
            None => stats.unmatched(),
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amplicon::Region;
    use crate::bam::testing::{header_view, record};
    use crate::stats::AmpliconStats;

    fn amplicon(strand: Strand) -> Amplicon {
        Amplicon::new(
            "amp",
            Region::new("chr1".to_owned(), 100, 400),
            Region::new("chr1".to_owned(), 120, 380),
            strand,
        )
        .unwrap()
    }

    fn read(pos: i64, len: u32, reverse: bool) -> Record {
        let flags = if reverse { 16 } else { 0 };
        record(&format!("r {} chr1 {} 60 {}M * 0 0 * *", flags, pos + 1, len))
    }

    fn matcher_with(options: MatchOptions) -> AmpliconMatcher {
        AmpliconMatcher::new(options, &header_view())
    }

    #[test]
    fn test_forward_amplicon() {
        let matcher = matcher_with(MatchOptions::default());
        let amp = amplicon(Strand::Forward);
        assert!(matcher.matches(&read(100, 150, false), &amp));
        assert!(matcher.matches(&read(109, 150, false), &amp));
        assert!(matcher.matches(&read(91, 150, false), &amp));
        assert!(!matcher.matches(&read(110, 150, false), &amp));
        assert!(!matcher.matches(&read(90, 150, false), &amp));
        assert!(!matcher.matches(&read(100, 150, true), &amp));
    }

    #[test]
    fn test_reverse_amplicon() {
        let matcher = matcher_with(MatchOptions::default());
        let amp = amplicon(Strand::Reverse);
        assert!(matcher.matches(&read(250, 150, true), &amp));
        assert!(matcher.matches(&read(241, 150, true), &amp));
        assert!(!matcher.matches(&read(240, 150, true), &amp));
        assert!(!matcher.matches(&read(250, 150, false), &amp));
    }

    #[test]
    fn test_unmapped_and_other_contig() {
        let matcher = matcher_with(MatchOptions::default());
        let amp = amplicon(Strand::Forward);
        let unmapped = record("r 4 chr1 101 60 150M * 0 0 * *");
        assert!(!matcher.matches(&unmapped, &amp));
        let other = record("r 0 chr2 101 60 150M * 0 0 * *");
        assert_eq!(matcher.contig(&other), Some("chr2"));
        assert!(!matcher.matches(&other, &amp));
        let unplaced = record("r 4 * 0 0 * * 0 0 ACGT *");
        assert_eq!(matcher.contig(&unplaced), None);
        assert!(!matcher.matches(&unplaced, &amp));
    }

    #[test]
    fn test_unstranded_rules() {
        let amp = amplicon(Strand::Unknown);
        let gated = matcher_with(MatchOptions::default());
        let either = matcher_with(MatchOptions {
            unstranded_rule: UnstrandedRule::EitherEdge,
            ..Default::default()
        });
        // forward read ending at the amplicon end
        let rec = read(250, 150, false);
        assert!(!gated.matches(&rec, &amp));
        assert!(either.matches(&rec, &amp));
        // reverse read ending at the amplicon end
        let rec = read(250, 150, true);
        assert!(gated.matches(&rec, &amp));
        assert!(either.matches(&rec, &amp));
        // forward read starting at the amplicon start
        assert!(gated.matches(&read(100, 50, false), &amp));
    }

    #[test]
    fn test_find_reports_first_match() {
        let amplicons = vec![
            amplicon(Strand::Forward),
            Amplicon::new(
                "amp2",
                Region::new("chr1".to_owned(), 100, 300),
                Region::new("chr1".to_owned(), 120, 280),
                Strand::Forward,
            )
            .unwrap(),
        ];
        let matcher = matcher_with(MatchOptions::default());
        let mut stats = AmpliconStats::default();
        let found = matcher.find(&read(100, 150, false), &amplicons, &mut stats);
        assert_eq!(found.map(|a| a.id()), Some("amp"));
        assert!(matcher.find(&read(500, 150, false), &amplicons, &mut stats).is_none());
        assert_eq!(stats.counts("amp").matches, 1);
        assert_eq!(stats.counts("amp2").matches, 0);
        assert_eq!(stats.unmatched_reads(), 1);
    }
}
