//! # Naming utilities
//!
//! Temporary objects created by an extraction run share a random per-run prefix, so that
//! concurrent runs against the same database never collide. Aliases inside queries are
//! numbered per kind.
//!

use chrono::Local;
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;

pub const FRAME: &str = "frame";
pub const SERIES: &str = "series";
pub const AGGREGATE: &str = "aggregate";
pub const ROW: &str = "row";
pub const POPULATION: &str = "population";
pub const RESULTS: &str = "results";

/// Counts named objects per kind
#[derive(Clone, Debug, Default)]
pub struct Namer {
    prefix: String,
    counts: HashMap<String, usize>,
}

impl Namer {
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Namer {
            prefix: prefix.into(),
            counts: HashMap::new(),
        }
    }

    /// A new name of the form `<prefix><kind>_<n>`
    pub fn new_name<S: AsRef<str>>(&mut self, kind: S) -> String {
        let kind = kind.as_ref();
        let count = self.counts.entry(kind.to_string()).or_default();
        let name = format!("{}{}_{}", self.prefix, kind, count);
        *count += 1;
        name
    }
}

/// A prefix unique to an extraction run: `tmp_YYYYMMDD_<12 random hex digits>_`
pub fn run_prefix() -> String {
    let mut bytes = [0u8; 6];
    OsRng.fill_bytes(&mut bytes);
    format!(
        "tmp_{}_{}_",
        Local::now().format("%Y%m%d"),
        bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namer() {
        let mut namer = Namer::new("tmp_");
        assert_eq!(namer.new_name(FRAME), "tmp_frame_0");
        assert_eq!(namer.new_name(FRAME), "tmp_frame_1");
        assert_eq!(namer.new_name(ROW), "tmp_row_0");
        println!("{:?}", namer);
        let mut unprefixed = Namer::default();
        assert_eq!(unprefixed.new_name(SERIES), "series_0");
    }

    #[test]
    fn test_run_prefix() {
        let prefix = run_prefix();
        println!("prefix = {prefix}");
        assert_eq!(prefix.len(), "tmp_YYYYMMDD_".len() + 12 + 1);
        assert!(prefix.starts_with("tmp_"));
        assert!(prefix.ends_with('_'));
        assert_ne!(prefix, run_prefix());
    }
}
