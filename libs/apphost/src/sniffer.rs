//! Sniffer SPI: detectors that recognise which specifications an archive uses.
//!
//! A sniffer instance lives for exactly one archive scan. The pipeline feeds it every
//! class and descriptor found in the archive; the sniffer answers whether the input
//! belongs to its specification and keeps whatever it needs to report
//! [`Sniffer::deployment_data`] afterwards. Sniffers never execute application code.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::archive::ClassDescriptor;

/// Identifier of a specification a module implements (e.g. `jax-rs`, `cdi`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SpecificationId(Cow<'static, str>);

impl SpecificationId {
    #[must_use]
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SpecificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SpecificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Detector for one (or a few closely related) specifications.
///
/// `triggered_*` must stay correct when invoked for every class of the archive: the
/// fast-detection shortcut is an optimization the pipeline may or may not apply.
pub trait Sniffer: Send {
    /// Short name used in logs and scan reports.
    fn name(&self) -> &'static str;

    /// Specifications found so far; only consulted if the sniffer triggered at least once.
    fn detected_specifications(&self) -> BTreeSet<SpecificationId>;

    /// Does this class belong to the sniffer's specification?
    fn triggered_by_class(&mut self, class: &ClassDescriptor) -> bool;

    /// Does this descriptor file (path relative to the archive root) belong to the
    /// sniffer's specification?
    fn triggered_by_descriptor(&mut self, _name: &str, _content: &[u8]) -> bool {
        false
    }

    /// When `true`, one positive class answer is enough and the pipeline may stop
    /// feeding classes to this sniffer for the rest of the archive.
    fn is_fast_detection(&self) -> bool {
        false
    }

    /// Key/value data accumulated across all triggering inputs.
    fn deployment_data(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}
