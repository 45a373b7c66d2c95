// Copyright 2014 Christopher Schröder, Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Glue between the passes and rust-htslib alignment I/O.
//!
//! Records, headers, readers and writers are the rust-htslib ones. This module
//! adds the record sink the passes write to, a few record conveniences, and
//! the pileup source used to resolve reference positions.

pub mod pileup;

use linear_map::LinearMap;

use crate::errors::Result;

pub use rust_htslib::bam::header::HeaderRecord;
pub use rust_htslib::bam::record::{Aux, Cigar, CigarString, CigarStringView};
pub use rust_htslib::bam::{Format, Header, HeaderView, IndexedReader, Read, Reader, Record, Writer};

pub use crate::bam::pileup::{PileupColumn, PileupRead, PileupSource};

/// SAM flag bits used by the passes.
pub mod flags {
    pub const PAIRED: u16 = 0x1;
    pub const PROPERLY_PAIRED: u16 = 0x2;
    pub const REVERSE: u16 = 0x10;
    pub const MATE_REVERSE: u16 = 0x20;
    pub const FIRST_IN_PAIR: u16 = 0x40;
    pub const SECOND_IN_PAIR: u16 = 0x80;
    pub const SECONDARY: u16 = 0x100;
    pub const QC_FAIL: u16 = 0x200;
    pub const DUPLICATE: u16 = 0x400;
    pub const SUPPLEMENTARY: u16 = 0x800;

    /// Bits distinguishing the records of a template that share a name.
    pub const MATE_BITS: u16 = FIRST_IN_PAIR | SECOND_IN_PAIR;

    /// Records with any of these bits neither enter position tables nor get
    /// clipped.
    pub const PILEUP_EXCLUDED: u16 = SECONDARY | SUPPLEMENTARY | QC_FAIL | DUPLICATE;
}

/// A trait for record sinks.
pub trait RecordSink {
    fn write(&mut self, record: &Record) -> Result<()>;
}

impl RecordSink for Writer {
    fn write(&mut self, record: &Record) -> Result<()> {
        Writer::write(self, record)?;
        Ok(())
    }
}

impl RecordSink for Vec<Record> {
    fn write(&mut self, record: &Record) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Conveniences on top of `bam::Record`.
pub trait RecordExt {
    /// Read name, with invalid UTF-8 replaced.
    fn qname_lossy(&self) -> String;

    /// Value of a scalar or string aux field in SAM text form. None if the
    /// tag is absent or holds an array.
    fn aux_text(&self, tag: &[u8]) -> Option<String>;

    /// Set an aux field, replacing an existing value.
    fn replace_aux(&mut self, tag: &[u8], value: Aux<'_>) -> Result<()>;

    /// Move the alignment start to `pos`, keeping the index bin in step with
    /// the alignment span. Call after the CIGAR is final.
    fn place(&mut self, pos: i64);
}

/// Index bin of the 0-based, half-open interval `[beg, end)`.
pub fn reg2bin(beg: i64, end: i64) -> u16 {
    let end = end.max(beg + 1) - 1;
    for &(shift, offset) in &[(14, 4681), (17, 585), (20, 73), (23, 9), (26, 1)] {
        if beg >> shift == end >> shift {
            return (offset + (beg >> shift)) as u16;
        }
    }
    0
}

impl RecordExt for Record {
    fn qname_lossy(&self) -> String {
        String::from_utf8_lossy(self.qname()).into_owned()
    }

    fn aux_text(&self, tag: &[u8]) -> Option<String> {
        let text = match self.aux(tag).ok()? {
            Aux::Char(c) => (c as char).to_string(),
            Aux::I8(v) => v.to_string(),
            Aux::U8(v) => v.to_string(),
            Aux::I16(v) => v.to_string(),
            Aux::U16(v) => v.to_string(),
            Aux::I32(v) => v.to_string(),
            Aux::U32(v) => v.to_string(),
            Aux::Float(v) => v.to_string(),
            Aux::Double(v) => v.to_string(),
            Aux::String(v) | Aux::HexByteArray(v) => v.to_owned(),
            _ => return None,
        };
        Some(text)
    }

    fn replace_aux(&mut self, tag: &[u8], value: Aux<'_>) -> Result<()> {
        if self.aux(tag).is_ok() {
            self.remove_aux(tag)?;
        }
        self.push_aux(tag, value)?;
        Ok(())
    }

    fn place(&mut self, pos: i64) {
        self.set_pos(pos);
        let end = self.cigar().end_pos();
        self.set_bin(reg2bin(pos, end));
    }
}

/// All header records of the given type, e.g. `SQ` or `EA`, in file order.
pub fn header_records(header: &HeaderView, kind: &str) -> Vec<LinearMap<String, String>> {
    Header::from_template(header)
        .to_hashmap()
        .remove(kind)
        .unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_aux_text() {
        let rec = record("r1 0 chr1 101 60 4M * 0 0 ACGT IIII RG:Z:s1 mc:i:7 xa:A:c xb:f:0.5 xc:B:c,1,2");
        assert_eq!(rec.aux_text(b"RG").as_deref(), Some("s1"));
        assert_eq!(rec.aux_text(b"mc").as_deref(), Some("7"));
        assert_eq!(rec.aux_text(b"xa").as_deref(), Some("c"));
        assert_eq!(rec.aux_text(b"xb").as_deref(), Some("0.5"));
        assert_eq!(rec.aux_text(b"xc"), None);
        assert_eq!(rec.aux_text(b"zz"), None);
        assert_eq!(rec.qname_lossy(), "r1");
    }

    #[test]
    fn test_replace_aux() {
        let mut rec = record("r1 0 chr1 101 60 4M * 0 0 ACGT IIII ea:Z:amp1 RG:Z:s1");
        rec.replace_aux(b"ea", Aux::String("amp2")).unwrap();
        rec.replace_aux(b"NR", Aux::I32(3)).unwrap();
        assert_eq!(rec.aux_text(b"ea").as_deref(), Some("amp2"));
        assert_eq!(rec.aux_text(b"NR").as_deref(), Some("3"));
        assert_eq!(rec.aux_text(b"RG").as_deref(), Some("s1"));
    }

    #[test]
    fn test_quality_length_mismatch_is_rejected() {
        let line = "r1\t0\tchr1\t101\t60\t4M\t*\t0\t0\tACGT\tII";
        assert!(Record::from_sam(&header_view(), line.as_bytes()).is_err());
    }

    #[test]
    fn test_absent_quality_matches_sequence_length() {
        let rec = record("r1 0 chr1 101 60 4M * 0 0 ACGT *");
        assert_eq!(rec.seq_len(), 4);
        assert_eq!(rec.qual().len(), 4);
    }

    #[test]
    fn test_reg2bin() {
        assert_eq!(reg2bin(0, 1), 4681);
        assert_eq!(reg2bin(100, 400), 4681);
        assert_eq!(reg2bin(16383, 16385), 585);
        assert_eq!(reg2bin(5000, 5000), 4681);
    }

    #[test]
    fn test_place_matches_parsed_bin() {
        let parsed = record("r1 0 chr1 121 60 260M * 0 0 * *");
        let mut moved = record("r1 0 chr1 101 60 260M * 0 0 * *");
        moved.place(120);
        assert_eq!(moved.pos(), 120);
        assert_eq!(moved.bin(), parsed.bin());
        assert_eq!(moved, parsed);
    }

    #[test]
    fn test_header_records() {
        let view = header_view();
        let sq = header_records(&view, "SQ");
        assert_eq!(sq.len(), 2);
        assert_eq!(sq[0]["SN"], "chr1");
        assert_eq!(sq[0]["LN"], "6000");
        assert!(header_records(&view, "EA").is_empty());
    }

    #[test]
    fn test_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.sam");
        let rec = record("r1 16 chr1 111 60 5M * 0 0 ACGTA IIIII");
        {
            let mut writer = Writer::from_path(&path, &header(), Format::Sam).unwrap();
            RecordSink::write(&mut writer, &rec).unwrap();
        }
        let mut reader = Reader::from_path(&path).unwrap();
        let records: Vec<Record> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pos(), 110);
        assert!(records[0].is_reverse());

        let mut sink: Vec<Record> = Vec::new();
        sink.write(&rec).unwrap();
        assert_eq!(sink, vec![rec]);
    }

    #[test]
    fn test_read_sam_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sam(
            dir.path(),
            "in.sam",
            &[
                "r1 0 chr1 101 60 10M * 0 0 ACGTACGTAC *",
                "r2 16 chr1 111 60 5M * 0 0 ACGTA IIIII RG:Z:s1",
            ],
        );
        let mut reader = Reader::from_path(&path).unwrap();
        let mut record = Record::new();
        let mut names = Vec::new();
        while let Some(result) = reader.read(&mut record) {
            result.unwrap();
            names.push(record.qname_lossy());
        }
        assert_eq!(names, vec!["r1", "r2"]);
        assert_eq!(header_records(reader.header(), "SQ").len(), 2);
    }
}
