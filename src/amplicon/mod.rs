// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Amplicon designs: regions, trim windows and strands.
//!
//! Designs are loaded from a delimited design file with a header row, e.g.
//!
//! ```text
//! id      amplicon            trim                strand
//! amp1    chr1:100-400        chr1:120-380        +
//! ```
//!
//! Coordinates are 0-based and half-open, the same convention as record
//! positions. Loaded amplicons are carried along in the alignment header as
//! `@EA` lines, so later passes can restore them with `amplicons_from_header`.

pub mod matcher;

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use bio_types::strand::Strand;
use derive_new::new;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
#[cfg(feature = "serde_feature")]
use serde::{Deserialize, Serialize};

use crate::bam::{header_records, Header, HeaderRecord, HeaderView};
use crate::errors::{Error, Result};

pub use crate::amplicon::matcher::{AmpliconMatcher, MatchOptions, UnstrandedRule};

lazy_static! {
    static ref REGION_RE: Regex = Regex::new(r"^([^:\s]+):(\d+)-(\d+)$").unwrap();
}

/// A 0-based, half-open interval on a chromosome.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde_feature", derive(Serialize, Deserialize))]
pub struct Region {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
}

impl Region {
    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether `other` lies within this region.
    pub fn contains(&self, other: &Region) -> bool {
        self.chrom == other.chrom && self.start <= other.start && other.end <= self.end
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidRegion {
            region: s.to_owned(),
        };
        let caps = REGION_RE.captures(s.trim()).ok_or_else(invalid)?;
        let start: i64 = caps[2].parse().map_err(|_| invalid())?;
        let end: i64 = caps[3].parse().map_err(|_| invalid())?;
        if end < start {
            return Err(invalid());
        }
        Ok(Region::new(caps[1].to_owned(), start, end))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

/// Parse a strand column value. `+`/`1` is forward, `-`/`-1` reverse and
/// anything else unstranded.
pub fn parse_strand(value: &str) -> Strand {
    match value.trim() {
        "+" | "1" => Strand::Forward,
        "-" | "-1" => Strand::Reverse,
        _ => Strand::Unknown,
    }
}

pub fn strand_symbol(strand: Strand) -> &'static str {
    match strand {
        Strand::Forward => "+",
        Strand::Reverse => "-",
        Strand::Unknown => ".",
    }
}

/// A designed amplicon with the window of bases to keep after clipping.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde_feature", derive(Serialize, Deserialize))]
pub struct Amplicon {
    external_id: String,
    region: Region,
    trim: Region,
    strand: Strand,
}

impl Amplicon {
    /// Create an amplicon. The trim window must lie within the amplicon.
    pub fn new(external_id: &str, region: Region, trim: Region, strand: Strand) -> Result<Self> {
        if !region.contains(&trim) {
            return Err(Error::TrimOutsideAmplicon {
                id: external_id.to_owned(),
                amplicon: region.to_string(),
                trim: trim.to_string(),
            });
        }
        Ok(Amplicon {
            external_id: external_id.to_owned(),
            region,
            trim,
            strand,
        })
    }

    pub fn id(&self) -> &str {
        &self.external_id
    }

    pub fn chrom(&self) -> &str {
        &self.region.chrom
    }

    pub fn start(&self) -> i64 {
        self.region.start
    }

    pub fn end(&self) -> i64 {
        self.region.end
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    /// First reference base to keep.
    pub fn trim_start(&self) -> i64 {
        self.trim.start
    }

    /// First reference base past the kept window.
    pub fn trim_end(&self) -> i64 {
        self.trim.end
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn trim_region(&self) -> &Region {
        &self.trim
    }

    /// The `@EA` header line describing this amplicon.
    pub fn header_record(&self) -> HeaderRecord<'static> {
        let mut record = HeaderRecord::new(b"EA");
        record
            .push_tag(b"ID", &self.external_id)
            .push_tag(b"AC", &self.region)
            .push_tag(b"TC", &self.trim)
            .push_tag(b"ST", &strand_symbol(self.strand));
        record
    }
}

impl fmt::Display for Amplicon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.region, strand_symbol(self.strand))
    }
}

/// Columns of an amplicon design file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignOptions {
    pub delimiter: String,
    pub id_column: String,
    pub amplicon_column: String,
    pub trim_column: String,
    /// Optional; amplicons are unstranded if the column is absent.
    pub strand_column: String,
}

impl Default for DesignOptions {
    fn default() -> Self {
        DesignOptions {
            delimiter: "\t".to_owned(),
            id_column: "id".to_owned(),
            amplicon_column: "amplicon".to_owned(),
            trim_column: "trim".to_owned(),
            strand_column: "strand".to_owned(),
        }
    }
}

/// Load amplicons from a design file.
pub fn load_amplicons<P: AsRef<Path>>(path: P, options: &DesignOptions) -> Result<Vec<Amplicon>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.to_owned(),
        });
    }
    read_amplicons(BufReader::new(File::open(path)?), options)
}

/// Read amplicons from design file contents. Blank lines and lines starting
/// with `#` are skipped; the first remaining line names the columns.
pub fn read_amplicons<R: BufRead>(reader: R, options: &DesignOptions) -> Result<Vec<Amplicon>> {
    let mut columns: Option<DesignColumns> = None;
    let mut amplicons = Vec::new();
    let mut seen = HashSet::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = i + 1;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line
            .trim_end_matches('\r')
            .split(options.delimiter.as_str())
            .map(str::trim)
            .collect();

        if columns.is_none() {
            columns = Some(DesignColumns::locate(&fields, line_no, options)?);
            continue;
        }
        let cols = match columns.as_ref() {
            Some(cols) => cols,
            None => continue,
        };

        let field = |idx: usize, name: &str| {
            fields.get(idx).copied().ok_or_else(|| Error::MissingColumn {
                line: line_no,
                column: name.to_owned(),
            })
        };
        let id = field(cols.id, options.id_column.as_str())?;
        let region: Region = field(cols.amplicon, options.amplicon_column.as_str())?.parse()?;
        let trim: Region = field(cols.trim, options.trim_column.as_str())?.parse()?;
        let strand = match cols.strand {
            Some(idx) => parse_strand(fields.get(idx).copied().unwrap_or("")),
            None => Strand::Unknown,
        };

        if !seen.insert(id.to_owned()) {
            return Err(Error::DuplicateAmplicon { id: id.to_owned() });
        }
        amplicons.push(Amplicon::new(id, region, trim, strand)?);
    }
    debug!("loaded {} amplicons", amplicons.len());
    Ok(amplicons)
}

struct DesignColumns {
    id: usize,
    amplicon: usize,
    trim: usize,
    strand: Option<usize>,
}

impl DesignColumns {
    fn locate(header: &[&str], line: usize, options: &DesignOptions) -> Result<Self> {
        let find = |name: &str| header.iter().position(|column| *column == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| Error::MissingColumn {
                line,
                column: name.to_owned(),
            })
        };
        Ok(DesignColumns {
            id: require(options.id_column.as_str())?,
            amplicon: require(options.amplicon_column.as_str())?,
            trim: require(options.trim_column.as_str())?,
            strand: find(options.strand_column.as_str()),
        })
    }
}

/// Add an `@EA` line per amplicon to the header.
pub fn push_header_records(header: &mut Header, amplicons: &[Amplicon]) {
    for amplicon in amplicons {
        header.push_record(&amplicon.header_record());
    }
}

/// Restore the amplicons recorded in `@EA` header lines.
pub fn amplicons_from_header(header: &HeaderView) -> Result<Vec<Amplicon>> {
    let mut amplicons = Vec::new();
    for record in header_records(header, "EA") {
        let tag = |name: &str| {
            record
                .get(name)
                .ok_or_else(|| Error::HeaderAmpliconTag {
                    tag: name.to_owned(),
                })
        };
        let id = tag("ID")?;
        let region: Region = tag("AC")?.parse()?;
        let trim: Region = tag("TC")?.parse()?;
        let strand = record
            .get("ST")
            .map(|s| parse_strand(s))
            .unwrap_or(Strand::Unknown);
        amplicons.push(Amplicon::new(id, region, trim, strand)?);
    }
    Ok(amplicons)
}
