// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Collapsing of duplicate reads sharing a molecular counter into consensus
//! reads.
//!
//! Records are grouped by their read group, molecular counter and amplicon
//! tags. Once the input is consumed, each group is split by mate role and
//! every role with more than one read is aligned, voted on column by column
//! and replaced by a single consensus record. The remaining originals are
//! emitted marked as duplicates.

pub mod aligner;

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, info, warn};

use crate::bam::flags::{
    FIRST_IN_PAIR, MATE_REVERSE, PAIRED, PROPERLY_PAIRED, REVERSE, SECOND_IN_PAIR,
};
use crate::bam::{Aux, Cigar, CigarString, Read, Record, RecordExt, RecordSink};
use crate::errors::Result;
use crate::tags;

pub use crate::consensus::aligner::{
    check_alignment, parse_clustal, ConsensusAligner, MuscleAligner, UngappedAligner, GAP,
};

/// Flag of a first mate consensus read: paired, proper, mate reverse.
pub const CONSENSUS_FIRST: u16 = PAIRED | PROPERLY_PAIRED | MATE_REVERSE | FIRST_IN_PAIR;
/// Flag of a second mate consensus read: paired, proper, reverse.
pub const CONSENSUS_SECOND: u16 = PAIRED | PROPERLY_PAIRED | REVERSE | SECOND_IN_PAIR;

/// Stored quality of a base without one.
const MISSING_QUALITY: u8 = 0xff;

/// End of the quality string receiving sentinel padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPadding {
    Leading,
    Trailing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusOptions {
    /// Fraction of non-gap votes a base must strictly exceed to be called.
    pub threshold: f64,
    /// Called where no base wins. BAM sequences can only store `=ACMGRSVTWYHKDBN`.
    pub ambiguous_base: u8,
    /// Phred score used where no read votes on a quality.
    pub quality_sentinel: u8,
    pub first_mate_padding: QualityPadding,
    pub second_mate_padding: QualityPadding,
}

impl Default for ConsensusOptions {
    fn default() -> Self {
        ConsensusOptions {
            threshold: 0.80,
            ambiguous_base: b'N',
            // 'B' in the SAM text form
            quality_sentinel: 33,
            first_mate_padding: QualityPadding::Trailing,
            second_mate_padding: QualityPadding::Leading,
        }
    }
}

impl ConsensusOptions {
    fn padding(&self, role: MateRole) -> QualityPadding {
        match role {
            MateRole::Second => self.second_mate_padding,
            MateRole::First | MateRole::Unpaired => self.first_mate_padding,
        }
    }
}

/// Position of a read within its template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MateRole {
    First,
    Second,
    Unpaired,
}

impl MateRole {
    pub fn of(record: &Record) -> Self {
        if record.is_first_in_template() {
            MateRole::First
        } else if record.is_last_in_template() {
            MateRole::Second
        } else {
            MateRole::Unpaired
        }
    }

    /// Suffix of consensus read names.
    pub fn suffix(self) -> &'static str {
        match self {
            MateRole::First => "R1",
            MateRole::Second => "R2",
            MateRole::Unpaired => "U",
        }
    }
}

/// Key of a duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub read_group: String,
    pub counter: String,
    pub amplicon: String,
}

impl GroupKey {
    /// The key of a record, if it carries all three tags.
    pub fn of(record: &Record) -> Option<Self> {
        Some(GroupKey {
            read_group: record.aux_text(tags::READ_GROUP)?,
            counter: record.aux_text(tags::MOLECULAR_COUNTER)?,
            amplicon: record.aux_text(tags::AMPLICON)?,
        })
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.read_group, self.counter, self.amplicon)
    }
}

/// Majority vote over the columns of an alignment. Gaps do not vote; a
/// column whose majority base does not strictly exceed the threshold is
/// called ambiguous. Ties go to the base seen first. Columns consisting of
/// gaps only are skipped.
pub fn majority_consensus(rows: &[Vec<u8>], options: &ConsensusOptions) -> Vec<u8> {
    let width = rows.iter().map(|row| row.len()).max().unwrap_or(0);
    let mut consensus = Vec::with_capacity(width);
    for col in 0..width {
        let column = rows.iter().filter_map(|row| row.get(col)).filter(|&&b| b != GAP);
        if let Some((base, count, total)) = majority(column.copied()) {
            if count as f64 / total as f64 > options.threshold {
                consensus.push(base);
            } else {
                consensus.push(options.ambiguous_base);
            }
        }
    }
    consensus
}

/// Most frequent item with its count and the number of items. Ties go to
/// the item seen first.
fn majority<I: IntoIterator<Item = u8>>(items: I) -> Option<(u8, usize, usize)> {
    // insertion ordered tally
    let mut counts: Vec<(u8, usize)> = Vec::new();
    let mut total = 0;
    for item in items {
        total += 1;
        match counts.iter_mut().find(|(seen, _)| *seen == item) {
            Some((_, count)) => *count += 1,
            None => counts.push((item, 1)),
        }
    }
    let mut best: Option<(u8, usize)> = None;
    for &(item, count) in &counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((item, count));
        }
    }
    best.map(|(item, count)| (item, count, total))
}

/// The most frequent quality at each read offset, for offsets up to the
/// longest sequence. Offsets no read has a quality for get the sentinel.
pub fn mode_qualities(reads: &[&Record], sentinel: u8) -> Vec<u8> {
    let len = reads.iter().map(|r| r.seq_len()).max().unwrap_or(0);
    (0..len)
        .map(|offset| {
            let quals = reads
                .iter()
                .filter_map(|r| r.qual().get(offset).copied())
                .filter(|&qual| qual != MISSING_QUALITY);
            majority(quals).map_or(sentinel, |(qual, _, _)| qual)
        })
        .collect()
}

/// Fit qualities to `len`, padding with the sentinel or cutting at the given
/// end.
fn fit_qualities(mut qual: Vec<u8>, len: usize, padding: QualityPadding, sentinel: u8) -> Vec<u8> {
    match padding {
        QualityPadding::Trailing => qual.resize(len, sentinel),
        QualityPadding::Leading => {
            if qual.len() > len {
                qual.drain(..qual.len() - len);
            } else {
                let mut padded = vec![sentinel; len - qual.len()];
                padded.extend(qual);
                qual = padded;
            }
        }
    }
    qual
}

#[derive(Debug, Default)]
struct ResolvedRole {
    reads: Vec<Record>,
    consensus: Option<Record>,
    duplicates: u64,
}

/// Resolve the reads of one mate role.
fn resolve_role<A: ConsensusAligner>(
    aligner: &A,
    options: &ConsensusOptions,
    key: &GroupKey,
    role: MateRole,
    mut reads: Vec<Record>,
) -> Result<ResolvedRole> {
    if reads.len() < 2 {
        for read in &mut reads {
            read.unset_duplicate();
        }
        return Ok(ResolvedRole {
            reads,
            ..Default::default()
        });
    }

    let bases: Vec<Vec<u8>> = reads.iter().map(|r| r.seq().as_bytes()).collect();
    let seqs: Vec<&[u8]> = bases.iter().map(Vec::as_slice).collect();
    let rows = aligner.align(&seqs)?;
    check_alignment(&rows, seqs.len())?;
    let seq = majority_consensus(&rows, options);
    let refs: Vec<&Record> = reads.iter().collect();
    let qual = fit_qualities(
        mode_qualities(&refs, options.quality_sentinel),
        seq.len(),
        options.padding(role),
        options.quality_sentinel,
    );
    let consensus = consensus_record(key, role, &reads, &seq, &qual)?;

    // the survivor is replaced by the consensus
    reads.pop();
    for read in &mut reads {
        read.set_duplicate();
    }
    Ok(ResolvedRole {
        duplicates: reads.len() as u64,
        reads,
        consensus: Some(consensus),
    })
}

fn consensus_record(
    key: &GroupKey,
    role: MateRole,
    reads: &[Record],
    seq: &[u8],
    qual: &[u8],
) -> Result<Record> {
    let template = &reads[0];
    let pos = reads.iter().map(|r| r.pos()).min().unwrap_or(-1);
    let qname = format!(
        "con_{}_{}_{}:{}",
        pos + 1,
        key.counter,
        key.read_group,
        role.suffix()
    );
    let mut record = Record::new();
    record.set(
        qname.as_bytes(),
        Some(&CigarString(vec![Cigar::Match(seq.len() as u32)])),
        seq,
        qual,
    );
    record.set_flags(match role {
        MateRole::First => CONSENSUS_FIRST,
        MateRole::Second => CONSENSUS_SECOND,
        MateRole::Unpaired if template.is_reverse() => REVERSE,
        MateRole::Unpaired => 0,
    });
    record.set_tid(template.tid());
    record.place(pos);
    record.set_mapq(reads.iter().map(|r| r.mapq()).max().unwrap_or(255));
    record.set_mtid(match role {
        MateRole::Unpaired => -1,
        _ => template.mtid(),
    });
    record.set_mpos(-1);
    record.set_insert_size(0);
    for aux in template.aux_iter() {
        let (tag, value) = aux?;
        if tag != &tags::CONSENSUS_COUNT[..] {
            record.push_aux(tag, value)?;
        }
    }
    record.push_aux(tags::CONSENSUS_COUNT, Aux::I32(reads.len() as i32))?;
    Ok(record)
}

/// Point the consensus mates at each other. The template length is positive
/// on the first mate.
fn link_mates(first: &mut Record, second: &mut Record) {
    first.set_mpos(second.pos());
    second.set_mpos(first.pos());
    first.set_mtid(second.tid());
    second.set_mtid(first.tid());
    let tlen = second.cigar().end_pos() - first.pos();
    first.set_insert_size(tlen);
    second.set_insert_size(-tlen);
}

/// Output of a resolved group: the remaining originals followed by the
/// consensus records.
#[derive(Debug, Default)]
pub struct ResolvedGroup {
    pub reads: Vec<Record>,
    pub consensus: Vec<Record>,
    pub duplicates: u64,
}

/// Resolve one duplicate group. An aligner failure fails the whole group.
pub fn resolve_group<A: ConsensusAligner>(
    aligner: &A,
    options: &ConsensusOptions,
    key: &GroupKey,
    reads: &[Record],
) -> Result<ResolvedGroup> {
    let mut by_role: BTreeMap<MateRole, Vec<Record>> = BTreeMap::new();
    for read in reads {
        by_role
            .entry(MateRole::of(read))
            .or_insert_with(Vec::new)
            .push(read.clone());
    }

    let mut resolved = BTreeMap::new();
    for (role, reads) in by_role {
        resolved.insert(role, resolve_role(aligner, options, key, role, reads)?);
    }

    let mut first = resolved.remove(&MateRole::First).unwrap_or_default();
    let mut second = resolved.remove(&MateRole::Second).unwrap_or_default();
    let unpaired = resolved.remove(&MateRole::Unpaired).unwrap_or_default();
    if let (Some(r1), Some(r2)) = (first.consensus.as_mut(), second.consensus.as_mut()) {
        link_mates(r1, r2);
    }

    let mut group = ResolvedGroup::default();
    for role in vec![first, second, unpaired] {
        group.duplicates += role.duplicates;
        group.reads.extend(role.reads);
        group.consensus.extend(role.consensus);
    }
    Ok(group)
}

/// Tallies of a consensus pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupSummary {
    pub groups: u64,
    pub consensus_records: u64,
    pub duplicates_marked: u64,
    pub failed_groups: u64,
    pub untagged: u64,
}

/// Buffers tagged records into duplicate groups and emits them resolved.
#[derive(Debug)]
pub struct DuplicateConsensusBuilder<A: ConsensusAligner> {
    aligner: A,
    options: ConsensusOptions,
    groups: BTreeMap<GroupKey, Vec<Record>>,
    untagged: Vec<Record>,
}

impl<A: ConsensusAligner> DuplicateConsensusBuilder<A> {
    pub fn new(aligner: A, options: ConsensusOptions) -> Self {
        DuplicateConsensusBuilder {
            aligner,
            options,
            groups: BTreeMap::new(),
            untagged: Vec::new(),
        }
    }

    pub fn options(&self) -> &ConsensusOptions {
        &self.options
    }

    /// Number of groups collected so far.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Collect a record. Records lacking a group tag are kept aside and
    /// emitted first, unchanged.
    pub fn add(&mut self, record: Record) {
        match GroupKey::of(&record) {
            Some(key) => self.groups.entry(key).or_insert_with(Vec::new).push(record),
            None => self.untagged.push(record),
        }
    }

    /// Resolve all groups in key order and write the result. A group whose
    /// alignment fails is written unmodified.
    pub fn finish<W: RecordSink>(self, writer: &mut W) -> Result<DedupSummary> {
        let mut summary = DedupSummary::default();
        for record in &self.untagged {
            summary.untagged += 1;
            writer.write(record)?;
        }

        for (key, reads) in &self.groups {
            summary.groups += 1;
            debug!("resolving group {} of {} reads", key, reads.len());
            match resolve_group(&self.aligner, &self.options, key, reads) {
                Ok(group) => {
                    summary.consensus_records += group.consensus.len() as u64;
                    summary.duplicates_marked += group.duplicates;
                    for record in group.reads.iter().chain(group.consensus.iter()) {
                        writer.write(record)?;
                    }
                }
                Err(err) if err.is_aligner_failure() => {
                    warn!("consensus of group {} failed, writing it unmodified: {}", key, err);
                    summary.failed_groups += 1;
                    for record in reads {
                        writer.write(record)?;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            "consensus pass done: {} groups, {} consensus reads, {} duplicates, {} failed groups",
            summary.groups, summary.consensus_records, summary.duplicates_marked, summary.failed_groups
        );
        Ok(summary)
    }

    /// Collect all records of `reader`, then resolve them into `writer`.
    pub fn run<R: Read, W: RecordSink>(mut self, reader: &mut R, writer: &mut W) -> Result<DedupSummary> {
        let mut count = 0u64;
        for record in reader.records() {
            self.add(record?);
            count += 1;
            if count % 100_000 == 0 {
                info!("collected {} records into {} groups", count, self.groups.len());
            }
        }
        self.finish(writer)
    }
}
