// Copyright 2014 Johannes Köster.
// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Aux tags written and read by the passes.

/// Read group, i.e. the sample.
pub const READ_GROUP: &[u8; 2] = b"RG";
/// Observed sample barcode.
pub const BARCODE: &[u8; 2] = b"BC";
/// Molecular counter.
pub const MOLECULAR_COUNTER: &[u8; 2] = b"mc";
/// External id of the assigned amplicon.
pub const AMPLICON: &[u8; 2] = b"ea";
/// Number of reads a consensus read was built from.
pub const CONSENSUS_COUNT: &[u8; 2] = b"NR";
