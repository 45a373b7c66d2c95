// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::Path;

use amptools::amplicon::{amplicons_from_header, load_amplicons, DesignOptions, MatchOptions};
use amptools::annotate::{
    AdaptorLayout, AmpliconAnnotator, BarcodeAnnotator, CounterAnnotator, Pipeline,
};
use amptools::bam::{
    header_records, Format, Header, HeaderView, IndexedReader, Reader, Record, Writer,
};
use amptools::clip::Clipper;
use amptools::consensus::{ConsensusOptions, DuplicateConsensusBuilder, UngappedAligner};
use amptools::distribution::{amplicon_distribution, Observation, Variant};
use amptools::prelude::*;
use amptools::stats::AmpliconStats;
use amptools::tags;
use pretty_assertions::assert_eq;
use rust_htslib::bam::index;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn layout() -> AdaptorLayout {
    "BBBBMMMM".parse().unwrap()
}

fn annotate() -> (Header, Vec<Record>, String) {
    let amplicons = load_amplicons("test/design.tsv", &DesignOptions::default()).unwrap();
    let mut reader = Reader::from_path("test/reads.sam").unwrap();
    let input_header = reader.header().clone();

    let mut pipeline = Pipeline::new();
    pipeline
        .push(
            BarcodeAnnotator::from_paths("test/observed.txt", "test/samples.txt", "ILLUMINA", "amp")
                .unwrap()
                .with_layout(layout()),
        )
        .push(
            CounterAnnotator::from_path("test/observed.txt")
                .unwrap()
                .with_layout(layout()),
        )
        .push(AmpliconAnnotator::new(
            amplicons,
            &input_header,
            MatchOptions::default(),
            AmpliconStats::new("amptools annotate test/reads.sam"),
        ));

    let header = pipeline.header(&input_header);
    let mut annotated: Vec<Record> = Vec::new();
    let summary = pipeline.annotate_all(&mut reader, &mut annotated).unwrap();
    assert_eq!(summary.records, 5);
    assert_eq!(summary.kept, 5);

    let mut report = Vec::new();
    pipeline.report(&mut report).unwrap();
    (header, annotated, String::from_utf8(report).unwrap())
}

fn write_bam(path: &Path, header: &Header, records: &[Record]) {
    let mut writer = Writer::from_path(path, header, Format::Bam).unwrap();
    for record in records {
        writer.write(record).unwrap();
    }
}

#[test]
fn test_annotate() {
    init();
    let (header, records, report) = annotate();
    let header = HeaderView::from_header(&header);
    assert_eq!(header_records(&header, "EA").len(), 2);
    assert_eq!(header_records(&header, "RG").len(), 2);
    assert_eq!(header_records(&header, "SQ").len(), 1);

    let a1 = &records[0];
    assert_eq!(a1.qname(), b"a1");
    assert_eq!(a1.aux_text(tags::READ_GROUP).as_deref(), Some("patient1"));
    assert_eq!(a1.aux_text(tags::MOLECULAR_COUNTER).as_deref(), Some("AAAA"));
    assert_eq!(a1.aux_text(tags::AMPLICON).as_deref(), Some("A"));
    assert_eq!(records[3].aux_text(tags::AMPLICON).as_deref(), Some("B"));
    assert_eq!(records[4].aux_text(tags::AMPLICON), None);
    assert_eq!(records[4].aux_text(tags::READ_GROUP).as_deref(), Some("patient2"));

    assert!(report.contains("A\t3\t0\t0\t0\n"));
    assert!(report.contains("B\t1\t0\t0\t0\n"));
}

#[test]
fn test_annotate_clip_dedup() {
    init();
    let (header, annotated, _) = annotate();
    let tmp = tempfile::Builder::new()
        .prefix("amptools-test")
        .tempdir()
        .unwrap();
    let annotated_path = tmp.path().join("annotated.bam");
    write_bam(&annotated_path, &header, &annotated);
    index::build(&annotated_path, None, index::Type::Bai, 1).unwrap();

    // clip against the amplicons stored in the header
    let mut pileups = IndexedReader::from_path(&annotated_path).unwrap();
    let amplicons = amplicons_from_header(pileups.header()).unwrap();
    assert_eq!(amplicons.len(), 2);
    let clipper = Clipper::new(amplicons, &mut pileups).unwrap();

    let mut stats = AmpliconStats::new("amptools clip");
    let mut reader = Reader::from_path(&annotated_path).unwrap();
    let mut clipped: Vec<Record> = Vec::new();
    let summary = clipper.run(&mut reader, &mut clipped, &mut stats).unwrap();
    assert_eq!(summary.records, 5);
    assert_eq!(summary.clipped, 4);
    assert_eq!(summary.passed_through, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(stats.counts("A").start_trims, 3);
    assert_eq!(stats.counts("A").end_trims, 3);
    assert_eq!(stats.counts("B").start_trims, 1);

    let cigars: Vec<String> = clipped.iter().map(|r| r.cigar().to_string()).collect();
    assert_eq!(
        cigars,
        vec!["20H260M20H", "20H260M20H", "18H260M20H", "20H160M20H", "50M"]
    );
    assert!(clipped[..3]
        .iter()
        .all(|r| r.pos() == 120 && r.cigar().end_pos() == 380));
    assert_eq!(clipped[3].pos(), 1020);

    let clipped_path = tmp.path().join("clipped.bam");
    write_bam(&clipped_path, &header, &clipped);

    let builder = DuplicateConsensusBuilder::new(UngappedAligner, ConsensusOptions::default());
    let out_path = tmp.path().join("dedup.bam");
    let dedup = {
        let mut reader = Reader::from_path(&clipped_path).unwrap();
        let mut writer = Writer::from_path(&out_path, &header, Format::Bam).unwrap();
        builder.run(&mut reader, &mut writer).unwrap()
    };
    assert_eq!(dedup.groups, 2);
    assert_eq!(dedup.consensus_records, 1);
    assert_eq!(dedup.duplicates_marked, 2);
    assert_eq!(dedup.untagged, 1);

    let mut reader = Reader::from_path(&out_path).unwrap();
    assert_eq!(header_records(reader.header(), "EA").len(), 2);
    let records: Vec<Record> = reader.records().map(|r| r.unwrap()).collect();
    let names: Vec<String> = records.iter().map(|r| r.qname_lossy()).collect();
    assert_eq!(
        names,
        vec!["u1", "a1", "a3", "con_121_AAAA_patient1:R1", "b1"]
    );
    assert!(records[1].is_duplicate() && records[2].is_duplicate());
    assert!(!records[4].is_duplicate());

    let consensus = &records[3];
    assert_eq!(consensus.seq().as_bytes(), records[1].seq().as_bytes());
    assert_eq!(consensus.cigar().to_string(), "260M");
    assert_eq!(consensus.pos(), 120);
    assert_eq!(consensus.flags(), 99);
    assert_eq!(consensus.aux_text(tags::CONSENSUS_COUNT).as_deref(), Some("3"));
    assert_eq!(consensus.aux_text(tags::AMPLICON).as_deref(), Some("A"));
}

#[test]
fn test_annotate_distribution() {
    init();
    let (header, annotated, _) = annotate();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("annotated.bam");
    write_bam(&path, &header, &annotated);
    index::build(&path, None, index::Type::Bai, 1).unwrap();
    let mut reader = IndexedReader::from_path(&path).unwrap();

    // a1 and a3 start at 100, a2 at 102
    let reference = annotated[0].seq().as_bytes()[50];
    let alt = if reference == b'A' { b'C' } else { b'A' };
    let variant = Variant::new("chr1".to_owned(), 150, vec![reference], vec![alt]);
    let counts = amplicon_distribution(&mut reader, &variant).unwrap();

    let observation = Observation::new(Some("patient1".to_owned()), Some("A".to_owned()), true);
    assert_eq!(counts.len(), 1);
    assert_eq!(counts.get(&observation), Some(&3));
}
