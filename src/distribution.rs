// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Distribution of variant alleles over samples and amplicons.
//!
//! Every read covering a variant is reduced to the bases it shows over the
//! reference allele span. Reads showing exactly the reference or the first
//! alternative allele are counted per read group, amplicon and allele.

use std::collections::{BTreeMap, HashMap};

use derive_new::new;
use log::debug;
use rust_htslib::bam::pileup::Indel;
use rust_htslib::bcf;

use crate::bam::flags::{MATE_BITS, PILEUP_EXCLUDED};
use crate::bam::{IndexedReader, Read, RecordExt};
use crate::errors::{Error, Result};
use crate::tags;

/// Maximum number of reads piled up per position.
pub const PILEUP_DEPTH: u32 = 300_000;

/// A variant with a single alternative allele. `pos` is 0-based.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub chrom: String,
    pub pos: i64,
    pub ref_allele: Vec<u8>,
    pub alt_allele: Vec<u8>,
}

impl Variant {
    /// The variant of a VCF/BCF record. Only the first alternative allele is
    /// considered.
    pub fn from_bcf(record: &bcf::Record) -> Result<Self> {
        let invalid = |msg: &str| Error::InvalidVariant {
            pos: record.pos(),
            msg: msg.to_owned(),
        };
        let rid = record.rid().ok_or_else(|| invalid("record has no contig"))?;
        let chrom = String::from_utf8_lossy(record.header().rid2name(rid)?).into_owned();
        let alleles = record.alleles();
        if alleles.len() < 2 {
            return Err(invalid("record has no alternative allele"));
        }
        if alleles.len() > 2 {
            debug!(
                "counting only the first of {} alternative alleles at {}:{}",
                alleles.len() - 1,
                chrom,
                record.pos() + 1
            );
        }
        Ok(Variant::new(
            chrom,
            record.pos(),
            alleles[0].to_vec(),
            alleles[1].to_vec(),
        ))
    }

    pub fn is_indel(&self) -> bool {
        self.ref_allele.len() != self.alt_allele.len()
    }

    /// End of the reference allele span, exclusive.
    pub fn end(&self) -> i64 {
        self.pos + self.ref_allele.len() as i64
    }
}

/// Key of the distribution: where a read comes from and which allele it shows.
#[derive(new, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Observation {
    pub read_group: Option<String>,
    pub amplicon: Option<String>,
    pub is_ref: bool,
}

#[derive(Debug)]
struct ReadBases {
    read_group: Option<String>,
    amplicon: Option<String>,
    bases: Vec<u8>,
}

/// Bases a read shows at one pileup column: nothing over a deletion, the
/// aligned base followed by the inserted bases before an insertion, the
/// aligned base otherwise.
fn column_bases(seq: &[u8], qpos: Option<usize>, indel: Indel) -> Vec<u8> {
    match (qpos, indel) {
        (None, _) => Vec::new(),
        (Some(qpos), Indel::Ins(len)) => {
            let end = (qpos + 1 + len as usize).min(seq.len());
            seq.get(qpos..end).map(<[u8]>::to_vec).unwrap_or_default()
        }
        (Some(qpos), _) => seq.get(qpos..=qpos).map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

/// Count the reads showing the reference or alternative allele of `variant`,
/// by read group and amplicon. Secondary, supplementary, QC failed and
/// duplicate alignments are not counted; the mates of a pair count
/// separately.
pub fn amplicon_distribution(
    reader: &mut IndexedReader,
    variant: &Variant,
) -> Result<BTreeMap<Observation, u64>> {
    let mut counts = BTreeMap::new();
    if reader.header().tid(variant.chrom.as_bytes()).is_none() {
        return Ok(counts);
    }
    let (start, end) = (variant.pos, variant.end());
    reader.fetch((variant.chrom.as_str(), start, end))?;

    let mut reads: HashMap<(Vec<u8>, u16), ReadBases> = HashMap::new();
    let mut pileups = reader.pileup();
    pileups.set_max_depth(PILEUP_DEPTH);
    for pileup in pileups {
        let pileup = pileup?;
        let pos = i64::from(pileup.pos());
        if pos < start || pos >= end {
            continue;
        }
        for alignment in pileup.alignments() {
            let record = alignment.record();
            if record.flags() & PILEUP_EXCLUDED != 0 {
                continue;
            }
            let bases = column_bases(&record.seq().as_bytes(), alignment.qpos(), alignment.indel());
            reads
                .entry((record.qname().to_vec(), record.flags() & MATE_BITS))
                .or_insert_with(|| ReadBases {
                    read_group: record.aux_text(tags::READ_GROUP),
                    amplicon: record.aux_text(tags::AMPLICON),
                    bases: Vec::new(),
                })
                .bases
                .extend(bases);
        }
    }

    let total = reads.len();
    for read in reads.into_values() {
        let is_ref = read.bases == variant.ref_allele;
        if is_ref || read.bases == variant.alt_allele {
            *counts
                .entry(Observation::new(read.read_group, read.amplicon, is_ref))
                .or_insert(0) += 1;
        }
    }
    debug!(
        "{} of {} reads at {}:{} show an allele",
        counts.values().sum::<u64>(),
        total,
        variant.chrom,
        variant.pos + 1
    );
    Ok(counts)
}
