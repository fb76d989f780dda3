//! Sequential sniffing pipeline.
//!
//! Every class and descriptor of an archive is offered to every sniffer. Afterwards the
//! sniffers that triggered at least once contribute their specifications (union) and
//! deployment data (first writer wins, in sniffer order). Sniffers that never triggered
//! contribute nothing.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::archive::{ArchiveContent, ArchiveError, ArchiveItem, WalkStats};
use crate::sniffer::{Sniffer, SpecificationId};

/// Aggregate of one archive scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SniffOutcome {
    pub specifications: BTreeSet<SpecificationId>,
    pub data: BTreeMap<String, String>,
    /// Names of the sniffers that triggered, in sniffer order.
    pub triggered: Vec<&'static str>,
    /// Number of `triggered_*` calls per sniffer.
    pub invocations: BTreeMap<&'static str, usize>,
    pub stats: WalkStats,
}

struct Slot {
    sniffer: Box<dyn Sniffer>,
    triggered: bool,
    calls: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SniffingPipeline {
    fast_detection: bool,
}

impl Default for SniffingPipeline {
    fn default() -> Self {
        Self {
            fast_detection: true,
        }
    }
}

impl SniffingPipeline {
    /// `fast_detection` allows skipping fast-detecting sniffers once they triggered.
    #[must_use]
    pub fn new(fast_detection: bool) -> Self {
        Self { fast_detection }
    }

    #[must_use]
    pub fn fast_detection(&self) -> bool {
        self.fast_detection
    }

    /// Run `sniffers` (fresh instances) over `archive`.
    ///
    /// # Errors
    /// Propagates `ArchiveError` from the archive walk.
    pub fn scan(
        &self,
        archive: &dyn ArchiveContent,
        sniffers: Vec<Box<dyn Sniffer>>,
    ) -> Result<SniffOutcome, ArchiveError> {
        let mut slots: Vec<Slot> = sniffers
            .into_iter()
            .map(|sniffer| Slot {
                sniffer,
                triggered: false,
                calls: 0,
            })
            .collect();
        let fast = self.fast_detection;

        let stats = archive.walk(&mut |item| {
            for slot in &mut slots {
                let hit = match item {
                    ArchiveItem::Class(class) => {
                        if fast && slot.triggered && slot.sniffer.is_fast_detection() {
                            continue;
                        }
                        slot.calls += 1;
                        slot.sniffer.triggered_by_class(class)
                    }
                    ArchiveItem::Descriptor { name, content } => {
                        slot.calls += 1;
                        slot.sniffer.triggered_by_descriptor(name, content)
                    }
                };
                slot.triggered |= hit;
            }
        })?;

        let mut outcome = SniffOutcome {
            stats,
            ..SniffOutcome::default()
        };
        for slot in &slots {
            let name = slot.sniffer.name();
            outcome.invocations.insert(name, slot.calls);
            if !slot.triggered {
                continue;
            }
            outcome.triggered.push(name);
            outcome
                .specifications
                .extend(slot.sniffer.detected_specifications());
            for (key, value) in slot.sniffer.deployment_data() {
                outcome.data.entry(key).or_insert(value);
            }
        }

        tracing::debug!(
            archive = %archive.location().display(),
            triggered = ?outcome.triggered,
            specifications = ?outcome.specifications,
            "archive sniffed"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::archive::{ClassDescriptor, InMemoryArchive};

    /// Triggers on classes whose name starts with `prefix`; records them as data.
    struct PrefixSniffer {
        name: &'static str,
        prefix: &'static str,
        fast: bool,
        hits: Vec<String>,
    }

    impl PrefixSniffer {
        fn boxed(name: &'static str, prefix: &'static str, fast: bool) -> Box<dyn Sniffer> {
            Box::new(Self {
                name,
                prefix,
                fast,
                hits: Vec::new(),
            })
        }
    }

    impl Sniffer for PrefixSniffer {
        fn name(&self) -> &'static str {
            self.name
        }

        fn detected_specifications(&self) -> BTreeSet<SpecificationId> {
            BTreeSet::from([SpecificationId::new(self.name)])
        }

        fn triggered_by_class(&mut self, class: &ClassDescriptor) -> bool {
            let hit = class.name.starts_with(self.prefix);
            if hit && self.hits.is_empty() {
                self.hits.push(class.name.clone());
            }
            hit
        }

        fn triggered_by_descriptor(&mut self, name: &str, _content: &[u8]) -> bool {
            name.ends_with(&format!("{}.xml", self.name))
        }

        fn is_fast_detection(&self) -> bool {
            self.fast
        }

        fn deployment_data(&self) -> BTreeMap<String, String> {
            BTreeMap::from([
                ("shared".to_owned(), self.name.to_owned()),
                (format!("{}.first", self.name), self.hits.join(",")),
            ])
        }
    }

    fn archive() -> InMemoryArchive {
        InMemoryArchive::new("app.war")
            .with_class(ClassDescriptor::new("rest.A"))
            .with_class(ClassDescriptor::new("rest.B"))
            .with_class(ClassDescriptor::new("other.C"))
            .with_class(ClassDescriptor::new("rest.D"))
    }

    #[test]
    fn silent_sniffer_contributes_nothing() {
        let out = SniffingPipeline::new(false)
            .scan(
                &archive(),
                vec![
                    PrefixSniffer::boxed("rest", "rest.", false),
                    PrefixSniffer::boxed("ejb", "ejb.", false),
                ],
            )
            .unwrap();
        assert_eq!(out.triggered, vec!["rest"]);
        assert_eq!(
            out.specifications,
            BTreeSet::from([SpecificationId::from_static("rest")])
        );
        assert!(out.data.keys().all(|k| !k.starts_with("ejb")));
        assert_eq!(out.data.get("shared").map(String::as_str), Some("rest"));
    }

    #[test]
    fn first_writer_wins_among_sniffers() {
        let out = SniffingPipeline::new(false)
            .scan(
                &archive(),
                vec![
                    PrefixSniffer::boxed("second", "other.", false),
                    PrefixSniffer::boxed("first", "rest.", false),
                ],
            )
            .unwrap();
        assert_eq!(out.data.get("shared").map(String::as_str), Some("second"));
        assert_eq!(out.specifications.len(), 2);
    }

    #[test]
    fn fast_detection_does_not_change_the_result() {
        let run = |fast_detection: bool| {
            SniffingPipeline::new(fast_detection)
                .scan(
                    &archive(),
                    vec![
                        PrefixSniffer::boxed("rest", "rest.", true),
                        PrefixSniffer::boxed("other", "other.", false),
                    ],
                )
                .unwrap()
        };
        let full = run(false);
        let fast = run(true);

        assert_eq!(full.specifications, fast.specifications);
        assert_eq!(full.data, fast.data);
        assert_eq!(full.triggered, fast.triggered);

        assert_eq!(full.invocations["rest"], 4);
        assert_eq!(fast.invocations["rest"], 1);
        // non-fast sniffers are always fed every class
        assert_eq!(fast.invocations["other"], 4);
    }

    #[test]
    fn descriptors_are_always_offered() {
        let archive = InMemoryArchive::new("app.war")
            .with_class(ClassDescriptor::new("rest.A"))
            .with_entry("WEB-INF/rest.xml", b"<x/>".to_vec())
            .with_class(ClassDescriptor::new("rest.B"));
        let out = SniffingPipeline::new(true)
            .scan(&archive, vec![PrefixSniffer::boxed("rest", "rest.", true)])
            .unwrap();
        // one class before triggering + the descriptor
        assert_eq!(out.invocations["rest"], 2);
        assert_eq!(out.stats.descriptors, 1);
    }

    #[test]
    fn empty_archive_yields_no_specifications() {
        let out = SniffingPipeline::default()
            .scan(
                &InMemoryArchive::new("static.war").with_entry("index.html", b"hi".to_vec()),
                vec![PrefixSniffer::boxed("rest", "rest.", true)],
            )
            .unwrap();
        assert!(out.specifications.is_empty());
        assert!(out.data.is_empty());
        assert!(out.triggered.is_empty());
    }
}
