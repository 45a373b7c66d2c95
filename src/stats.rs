// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-amplicon tallies of matching and clipping, and the summary report.

use std::collections::BTreeMap;
use std::io;

use log::info;

/// Receiver of matching and clipping events, keyed by amplicon id.
pub trait StatsSink {
    fn matched(&mut self, amplicon: &str);
    fn start_trimmed(&mut self, amplicon: &str);
    fn end_trimmed(&mut self, amplicon: &str);
    /// A read was dropped since it lies entirely within the primers.
    fn excluded(&mut self, amplicon: &str);
    /// A read names an amplicon that is not known.
    fn lookup_miss(&mut self, amplicon: &str);
    /// A read matched no amplicon.
    fn unmatched(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AmpliconCounts {
    pub matches: u64,
    pub start_trims: u64,
    pub end_trims: u64,
    pub excluded: u64,
}

/// Tallies per amplicon, reported in amplicon id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmpliconStats {
    invocation: String,
    counts: BTreeMap<String, AmpliconCounts>,
    lookup_misses: u64,
    unmatched: u64,
}

impl AmpliconStats {
    /// Create stats for the given command line, which is echoed in the report.
    pub fn new(invocation: &str) -> Self {
        AmpliconStats {
            invocation: invocation.to_owned(),
            ..Default::default()
        }
    }

    pub fn counts(&self, amplicon: &str) -> AmpliconCounts {
        self.counts.get(amplicon).copied().unwrap_or_default()
    }

    pub fn lookup_misses(&self) -> u64 {
        self.lookup_misses
    }

    pub fn unmatched_reads(&self) -> u64 {
        self.unmatched
    }

    /// Add the tallies of `other`.
    pub fn merge(&mut self, other: &AmpliconStats) {
        for (id, counts) in &other.counts {
            let entry = self.entry(id);
            entry.matches += counts.matches;
            entry.start_trims += counts.start_trims;
            entry.end_trims += counts.end_trims;
            entry.excluded += counts.excluded;
        }
        self.lookup_misses += other.lookup_misses;
        self.unmatched += other.unmatched;
    }

    fn entry(&mut self, amplicon: &str) -> &mut AmpliconCounts {
        self.counts.entry(amplicon.to_owned()).or_default()
    }

    /// Write the report: a version line, the invocation line, a blank line and
    /// a tab separated table with one row per amplicon.
    pub fn report<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "amptools version {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(out, "invocation: {}", self.invocation)?;
        writeln!(out)?;
        writeln!(out, "amplicon\tmatches\tstart_trims\tend_trims\texcluded")?;
        for (id, counts) in &self.counts {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                id, counts.matches, counts.start_trims, counts.end_trims, counts.excluded
            )?;
        }
        if self.lookup_misses > 0 || self.unmatched > 0 {
            info!(
                "{} reads matched no amplicon, {} reads named an unknown amplicon",
                self.unmatched, self.lookup_misses
            );
        }
        Ok(())
    }
}

impl StatsSink for AmpliconStats {
    fn matched(&mut self, amplicon: &str) {
        self.entry(amplicon).matches += 1;
    }

    fn start_trimmed(&mut self, amplicon: &str) {
        self.entry(amplicon).start_trims += 1;
    }

    fn end_trimmed(&mut self, amplicon: &str) {
        self.entry(amplicon).end_trims += 1;
    }

    fn excluded(&mut self, amplicon: &str) {
        self.entry(amplicon).excluded += 1;
    }

    fn lookup_miss(&mut self, _amplicon: &str) {
        self.lookup_misses += 1;
    }

    fn unmatched(&mut self) {
        self.unmatched += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_report() {
        let mut stats = AmpliconStats::new("amptools clip in.sam");
        stats.start_trimmed("b");
        stats.end_trimmed("b");
        stats.matched("a");
        stats.excluded("a");
        stats.lookup_miss("zzz");

        let mut out = Vec::new();
        stats.report(&mut out).unwrap();
        let expected = format!(
            "amptools version {}\ninvocation: amptools clip in.sam\n\n\
             amplicon\tmatches\tstart_trims\tend_trims\texcluded\n\
             a\t1\t0\t0\t1\n\
             b\t0\t1\t1\t0\n",
            env!("CARGO_PKG_VERSION")
        );
        assert_eq!(String::from_utf8(out).unwrap(), expected);
        assert_eq!(stats.lookup_misses(), 1);
        assert_eq!(stats.counts("zzz"), AmpliconCounts::default());
    }

    #[test]
    fn test_merge() {
        let mut a = AmpliconStats::default();
        a.matched("x");
        let mut b = AmpliconStats::default();
        b.matched("x");
        b.start_trimmed("y");
        b.unmatched();
        a.merge(&b);
        assert_eq!(a.counts("x").matches, 2);
        assert_eq!(a.counts("y").start_trims, 1);
        assert_eq!(a.unmatched_reads(), 1);
    }
}
