// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The annotate pass: a pipeline of stages tagging reads with their sample,
//! molecular counter and amplicon.
//!
//! Each stage maps a record to an [`AnnotationOutcome`]. A dropped record
//! leaves the pipeline and is tallied; an error aborts the pass.
//!
//! Barcodes and counters are read from whitespace-delimited text files:
//! the observed adaptor file lists `sequence accession` per line, the
//! sample file `barcode sample`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use log::{debug, info};

use crate::amplicon::{push_header_records, Amplicon, AmpliconMatcher, MatchOptions};
use crate::errors::{Error, Result};
use crate::bam::{Aux, Header, HeaderRecord, HeaderView, Read, Record, RecordExt, RecordSink};
use crate::stats::AmpliconStats;
use crate::tags;

/// Result of one annotation stage.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationOutcome {
    Keep(Record),
    Drop,
    Error(String),
}

/// A stage of the annotate pass.
pub trait Annotator {
    /// Name used in logs and drop tallies.
    fn name(&self) -> &str;

    fn annotate(&mut self, record: Record) -> AnnotationOutcome;

    /// Add the header lines describing the tags this stage writes.
    fn update_header(&self, _header: &mut Header) {}

    /// Write a report once the pass is done.
    fn report(&self, _out: &mut dyn io::Write) -> io::Result<()> {
        Ok(())
    }
}

/// Layout of an adaptor read: `B` marks a barcode base, `M` a molecular
/// counter base, any other character a fixed base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptorLayout {
    layout: Vec<u8>,
}

impl FromStr for AdaptorLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |msg: &str| Error::InvalidAdaptorLayout {
            layout: s.to_owned(),
            msg: msg.to_owned(),
        };
        if !s.is_ascii() {
            return Err(invalid("layout must be ASCII"));
        }
        if !s.contains('B') && !s.contains('M') {
            return Err(invalid("layout has neither barcode (B) nor counter (M) bases"));
        }
        Ok(AdaptorLayout {
            layout: s.as_bytes().to_vec(),
        })
    }
}

impl AdaptorLayout {
    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    fn extract(&self, seq: &str, kind: u8) -> Option<String> {
        if seq.len() != self.layout.len() {
            return None;
        }
        Some(
            self.layout
                .iter()
                .zip(seq.chars())
                .filter(|&(&l, _)| l == kind)
                .map(|(_, c)| c)
                .collect(),
        )
    }

    /// The barcode bases of an observed adaptor, or `None` if its length
    /// does not fit the layout.
    pub fn barcode(&self, seq: &str) -> Option<String> {
        self.extract(seq, b'B')
    }

    /// The counter bases of an observed adaptor, or `None` if its length
    /// does not fit the layout.
    pub fn counter(&self, seq: &str) -> Option<String> {
        self.extract(seq, b'M')
    }
}

/// Set string tags on a record, turning a failure into an error outcome.
fn tagged(mut record: Record, values: &[(&[u8], &str)]) -> AnnotationOutcome {
    for &(tag, value) in values {
        if let Err(err) = record.replace_aux(tag, Aux::String(value)) {
            return AnnotationOutcome::Error(err.to_string());
        }
    }
    AnnotationOutcome::Keep(record)
}

/// Pairs of the first two whitespace-separated fields of each non-empty line.
fn read_pairs<R: BufRead>(reader: R) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (None, _) => continue,
            (Some(first), Some(second)) => pairs.push((first.to_owned(), second.to_owned())),
            (Some(_), None) => {
                return Err(Error::MissingColumn {
                    line: i + 1,
                    column: "2".to_owned(),
                })
            }
        }
    }
    Ok(pairs)
}

fn open<P: AsRef<Path>>(path: P) -> Result<BufReader<File>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.to_owned(),
        });
    }
    Ok(BufReader::new(File::open(path)?))
}

/// Observed adaptor sequence per read accession.
fn read_observed<R: BufRead>(reader: R) -> Result<HashMap<String, String>> {
    Ok(read_pairs(reader)?
        .into_iter()
        .map(|(seq, accession)| (accession, seq))
        .collect())
}

/// Tags reads with their sample (`RG`) and barcode (`BC`).
#[derive(Debug, Clone)]
pub struct BarcodeAnnotator {
    observed: HashMap<String, String>,
    samples: HashMap<String, String>,
    layout: Option<AdaptorLayout>,
    platform: String,
    library: String,
}

impl BarcodeAnnotator {
    pub fn from_readers<O: BufRead, S: BufRead>(
        observed: O,
        samples: S,
        platform: &str,
        library: &str,
    ) -> Result<Self> {
        let observed = read_observed(observed)?;
        let samples: HashMap<_, _> = read_pairs(samples)?.into_iter().collect();
        debug!(
            "loaded {} observed adaptors and {} barcodes",
            observed.len(),
            samples.len()
        );
        Ok(BarcodeAnnotator {
            observed,
            samples,
            layout: None,
            platform: platform.to_owned(),
            library: library.to_owned(),
        })
    }

    pub fn from_paths<P: AsRef<Path>, Q: AsRef<Path>>(
        observed: P,
        samples: Q,
        platform: &str,
        library: &str,
    ) -> Result<Self> {
        Self::from_readers(open(observed)?, open(samples)?, platform, library)
    }

    /// Take the barcode from the `B` bases of the observed adaptor instead
    /// of the whole sequence.
    pub fn with_layout(mut self, layout: AdaptorLayout) -> Self {
        self.layout = Some(layout);
        self
    }
}

impl Annotator for BarcodeAnnotator {
    fn name(&self) -> &str {
        "barcode"
    }

    fn annotate(&mut self, record: Record) -> AnnotationOutcome {
        let observed = match self.observed.get(&record.qname_lossy()) {
            Some(observed) => observed,
            None => return AnnotationOutcome::Drop,
        };
        let barcode = match &self.layout {
            Some(layout) => match layout.barcode(observed) {
                Some(barcode) => barcode,
                None => {
                    return AnnotationOutcome::Error(format!(
                        "adaptor {} does not fit a layout of {} bases",
                        observed,
                        layout.len()
                    ))
                }
            },
            None => observed.clone(),
        };
        let sample = match self.samples.get(&barcode) {
            Some(sample) => sample.clone(),
            None => return AnnotationOutcome::Drop,
        };
        tagged(
            record,
            &[
                (&tags::READ_GROUP[..], sample.as_str()),
                (&tags::BARCODE[..], barcode.as_str()),
            ],
        )
    }

    fn update_header(&self, header: &mut Header) {
        let samples: BTreeSet<&String> = self.samples.values().collect();
        for sample in samples {
            let mut rg = HeaderRecord::new(b"RG");
            rg.push_tag(b"ID", sample)
                .push_tag(b"PL", &self.platform)
                .push_tag(b"LB", &self.library);
            header.push_record(&rg);
        }
    }
}

/// Tags reads with their molecular counter (`mc`).
#[derive(Debug, Clone)]
pub struct CounterAnnotator {
    observed: HashMap<String, String>,
    layout: Option<AdaptorLayout>,
}

impl CounterAnnotator {
    pub fn from_reader<R: BufRead>(observed: R) -> Result<Self> {
        Ok(CounterAnnotator {
            observed: read_observed(observed)?,
            layout: None,
        })
    }

    pub fn from_path<P: AsRef<Path>>(observed: P) -> Result<Self> {
        Self::from_reader(open(observed)?)
    }

    /// Take the counter from the `M` bases of the observed adaptor.
    pub fn with_layout(mut self, layout: AdaptorLayout) -> Self {
        self.layout = Some(layout);
        self
    }
}

impl Annotator for CounterAnnotator {
    fn name(&self) -> &str {
        "counter"
    }

    fn annotate(&mut self, record: Record) -> AnnotationOutcome {
        let observed = match self.observed.get(&record.qname_lossy()) {
            Some(observed) => observed,
            None => return AnnotationOutcome::Drop,
        };
        let counter = match &self.layout {
            Some(layout) => match layout.counter(observed) {
                Some(counter) => counter,
                None => {
                    return AnnotationOutcome::Error(format!(
                        "adaptor {} does not fit a layout of {} bases",
                        observed,
                        layout.len()
                    ))
                }
            },
            None => observed.clone(),
        };
        tagged(record, &[(&tags::MOLECULAR_COUNTER[..], counter.as_str())])
    }
}

/// Tags reads with the id of the first amplicon they match (`ea`). Reads
/// matching none are kept untagged.
#[derive(Debug, Clone)]
pub struct AmpliconAnnotator {
    amplicons: Vec<Amplicon>,
    matcher: AmpliconMatcher,
    stats: AmpliconStats,
}

impl AmpliconAnnotator {
    /// Annotator for reads aligned against the contigs of `header`.
    pub fn new(
        amplicons: Vec<Amplicon>,
        header: &HeaderView,
        options: MatchOptions,
        stats: AmpliconStats,
    ) -> Self {
        AmpliconAnnotator {
            amplicons,
            matcher: AmpliconMatcher::new(options, header),
            stats,
        }
    }

    pub fn stats(&self) -> &AmpliconStats {
        &self.stats
    }
}

impl Annotator for AmpliconAnnotator {
    fn name(&self) -> &str {
        "amplicon"
    }

    fn annotate(&mut self, record: Record) -> AnnotationOutcome {
        let id = self
            .matcher
            .find(&record, &self.amplicons, &mut self.stats)
            .map(|amplicon| amplicon.id().to_owned());
        match id {
            Some(id) => tagged(record, &[(&tags::AMPLICON[..], id.as_str())]),
            None => AnnotationOutcome::Keep(record),
        }
    }

    fn update_header(&self, header: &mut Header) {
        push_header_records(header, &self.amplicons);
    }

    fn report(&self, out: &mut dyn io::Write) -> io::Result<()> {
        self.stats.report(out)
    }
}

/// Tallies of an annotate pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotateSummary {
    pub records: u64,
    pub kept: u64,
    /// Dropped records per stage name.
    pub dropped: BTreeMap<String, u64>,
}

/// Stages applied in order to every record.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Annotator>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline { stages: Vec::new() }
    }

    pub fn push<A: Annotator + 'static>(&mut self, stage: A) -> &mut Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The output header: `template` extended by every stage.
    pub fn header(&self, template: &HeaderView) -> Header {
        let mut header = Header::from_template(template);
        for stage in &self.stages {
            stage.update_header(&mut header);
        }
        header
    }

    /// Run a record through all stages. Returns the name of the dropping
    /// stage if the record was dropped.
    fn apply(&mut self, mut record: Record) -> Result<std::result::Result<Record, String>> {
        for stage in self.stages.iter_mut() {
            let qname = record.qname_lossy();
            record = match stage.annotate(record) {
                AnnotationOutcome::Keep(record) => record,
                AnnotationOutcome::Drop => {
                    debug!("{} dropped by {} stage", qname, stage.name());
                    return Ok(Err(stage.name().to_owned()));
                }
                AnnotationOutcome::Error(reason) => {
                    return Err(Error::Annotation {
                        qname,
                        reason: format!("{}: {}", stage.name(), reason),
                    })
                }
            };
        }
        Ok(Ok(record))
    }

    /// Run a record through all stages, `None` meaning it was dropped.
    pub fn run(&mut self, record: Record) -> Result<Option<Record>> {
        Ok(self.apply(record)?.ok())
    }

    /// Annotate all records of `reader` into `writer`.
    pub fn annotate_all<R: Read, W: RecordSink>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<AnnotateSummary> {
        let mut summary = AnnotateSummary::default();
        for record in reader.records() {
            summary.records += 1;
            if summary.records % 100_000 == 0 {
                info!("annotated {} records", summary.records);
            }
            match self.apply(record?)? {
                Ok(record) => {
                    summary.kept += 1;
                    writer.write(&record)?;
                }
                Err(stage) => *summary.dropped.entry(stage).or_insert(0) += 1,
            }
        }
        info!(
            "annotate pass done: {} records, {} kept",
            summary.records, summary.kept
        );
        Ok(summary)
    }

    /// Write the reports of all stages.
    pub fn report(&self, out: &mut dyn io::Write) -> io::Result<()> {
        for stage in &self.stages {
            stage.report(out)?;
        }
        Ok(())
    }
}
