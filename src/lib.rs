// Copyright 2014 Christopher Schröder, Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Primer clipping, amplicon annotation and molecular-counter consensus for
//! amplicon sequencing alignments.
//!
//! A typical workflow runs three passes over BAM records:
//!
//! * [`annotate`] tags reads with their sample, molecular counter and the
//!   amplicon they belong to,
//! * [`clip`] removes the primer bases of every tagged read, rewriting its
//!   CIGAR so that the kept alignment boundary stays in place,
//! * [`consensus`] collapses reads sharing sample, counter and amplicon into
//!   one consensus read per mate.
//!
//! [`distribution`] counts how the alleles of a called variant spread over
//! samples and amplicons. Alignment I/O is rust-htslib's, see [`bam`].
//!
//! # Example
//!
//! ```
//! use amptools::amplicon::{Amplicon, Region};
//! use amptools::bam::{Format, Header, HeaderRecord, HeaderView, IndexedReader, Record, Writer};
//! use amptools::clip::Clipper;
//! use amptools::prelude::*;
//! use amptools::stats::AmpliconStats;
//! use bio_types::strand::Strand;
//! use rust_htslib::bam::index;
//!
//! let mut header = Header::new();
//! header.push_record(
//!     HeaderRecord::new(b"SQ")
//!         .push_tag(b"SN", &"chr1")
//!         .push_tag(b"LN", &6000),
//! );
//! let line = format!(
//!     "r1\t0\tchr1\t101\t60\t300M\t*\t0\t0\t{}\t*\tea:Z:amp1",
//!     "ACGT".repeat(75)
//! );
//! let record = Record::from_sam(&HeaderView::from_header(&header), line.as_bytes()).unwrap();
//!
//! // clipping needs an indexed file to pile up the reads of each amplicon
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("reads.bam");
//! {
//!     let mut writer = Writer::from_path(&path, &header, Format::Bam).unwrap();
//!     writer.write(&record).unwrap();
//! }
//! index::build(&path, None, index::Type::Bai, 1).unwrap();
//! let mut pileups = IndexedReader::from_path(&path).unwrap();
//!
//! let amplicon = Amplicon::new(
//!     "amp1",
//!     Region::new("chr1".to_owned(), 100, 400),
//!     Region::new("chr1".to_owned(), 120, 380),
//!     Strand::Forward,
//! ).unwrap();
//! let clipper = Clipper::new(vec![amplicon], &mut pileups).unwrap();
//!
//! let mut stats = AmpliconStats::new("example");
//! let clipped = clipper.clip_record(&record, &mut stats).unwrap().unwrap();
//! assert_eq!(clipped.cigar().to_string(), "20H260M20H");
//! assert_eq!(clipped.pos(), 120);
//! ```

pub mod amplicon;
pub mod annotate;
pub mod bam;
pub mod cigar;
pub mod clip;
pub mod consensus;
pub mod distribution;
pub mod errors;
pub mod position;
pub mod prelude;
pub mod stats;
pub mod tags;

pub use crate::errors::{Error, Result};
