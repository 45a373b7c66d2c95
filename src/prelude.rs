// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The purpose of this module is to provide reexports of core traits so that they can be then glob-imported all at once:
//!
//! ```
//! use amptools::prelude::*;
//! ```

pub use crate::annotate::Annotator;
pub use crate::bam::{PileupSource, Read, RecordExt, RecordSink};
pub use crate::cigar::CigarTrim;
pub use crate::consensus::ConsensusAligner;
pub use crate::stats::StatsSink;
