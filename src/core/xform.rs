//! core::xform
//!
//! Rename audit log for one migration run.
//!
//! A reference may be renamed several times in one run (for example
//! `refs/heads/x` -> `refs/heads/u/alice/x` -> `refs/heads/alice/x`). The log
//! keys each chain by its latest name, so the report shows one line per
//! logical reference. It is reporting only; nothing reads it for correctness.
//!
//! # Example
//!
//! ```
//! use refkeeper::core::xform::XForm;
//!
//! let mut xf = XForm::new();
//! xf.record("refs/heads/x", "refs/heads/u/alice/x");
//! xf.record("refs/heads/u/alice/x", "refs/heads/alice/x");
//!
//! let chains = xf.chains();
//! assert_eq!(
//!     chains[0],
//!     vec!["refs/heads/alice/x", "refs/heads/u/alice/x", "refs/heads/x"]
//! );
//! ```

use std::collections::BTreeMap;
use std::io::{self, Write};

/// Multi-hop rename log keyed by final name.
#[derive(Debug, Default, Clone)]
pub struct XForm {
    /// Latest name -> earlier names, oldest first.
    history: BTreeMap<String, Vec<String>>,
}

impl XForm {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `old` now lives at `new`.
    pub fn record(&mut self, old: &str, new: &str) {
        let mut chain = self.history.remove(old).unwrap_or_default();
        chain.push(old.to_string());
        self.history.insert(new.to_string(), chain);
    }

    /// Number of logical references renamed.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Check if nothing was renamed.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Every chain, newest name first, sorted by final name.
    pub fn chains(&self) -> Vec<Vec<String>> {
        self.history
            .iter()
            .map(|(latest, earlier)| {
                std::iter::once(latest.clone())
                    .chain(earlier.iter().rev().cloned())
                    .collect()
            })
            .collect()
    }

    /// Write one tab-separated chain per line.
    pub fn write_tsv(&self, out: &mut impl Write) -> io::Result<()> {
        for chain in self.chains() {
            writeln!(out, "{}", chain.join("\t"))?;
        }
        Ok(())
    }

    /// Write the chains as a JSON array of arrays.
    pub fn write_json(&self, out: &mut impl Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, &self.chains())?;
        writeln!(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_hop() {
        let mut xf = XForm::new();
        xf.record("a", "b");
        assert_eq!(xf.chains(), vec![vec!["b".to_string(), "a".to_string()]]);
    }

    #[test]
    fn multi_hop_collapses() {
        let mut xf = XForm::new();
        xf.record("a", "b");
        xf.record("b", "c");
        xf.record("x", "y");
        assert_eq!(xf.len(), 2);
        assert_eq!(
            xf.chains(),
            vec![
                vec!["c".to_string(), "b".to_string(), "a".to_string()],
                vec!["y".to_string(), "x".to_string()],
            ]
        );
    }

    #[test]
    fn tsv_output() {
        let mut xf = XForm::new();
        xf.record("refs/heads/a", "refs/heads/unknown/a");
        let mut buf = Vec::new();
        xf.write_tsv(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "refs/heads/unknown/a\trefs/heads/a\n"
        );
    }

    #[test]
    fn json_output() {
        let mut xf = XForm::new();
        xf.record("a", "b");
        let mut buf = Vec::new();
        xf.write_json(&mut buf).unwrap();
        let parsed: Vec<Vec<String>> = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed, vec![vec!["b".to_string(), "a".to_string()]]);
    }
}
