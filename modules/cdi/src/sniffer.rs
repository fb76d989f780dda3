use std::collections::{BTreeMap, BTreeSet};

use apphost::archive::ClassDescriptor;
use apphost::{Sniffer, SpecificationId};

use crate::contract::{BeanArchiveKind, DiscoveryMode};

pub const CDI: &str = "cdi";

/// `explicit` or `implicit`.
pub const BEAN_ARCHIVE_KEY: &str = "cdi.bean-archive";
pub const DISCOVERY_MODE_KEY: &str = "cdi.bean-discovery-mode";

const NAMESPACES: [&str; 2] = ["javax", "jakarta"];

const BEAN_DEFINING: [&str; 7] = [
    "enterprise.context.ApplicationScoped",
    "enterprise.context.RequestScoped",
    "enterprise.context.SessionScoped",
    "enterprise.context.ConversationScoped",
    "enterprise.context.Dependent",
    "interceptor.Interceptor",
    "decorator.Decorator",
];

fn is_bean_defining(type_name: &str) -> bool {
    NAMESPACES.iter().any(|ns| {
        type_name
            .strip_prefix(ns)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|member| BEAN_DEFINING.contains(&member))
    })
}

fn is_beans_xml(name: &str) -> bool {
    name == "WEB-INF/beans.xml" || name.ends_with("META-INF/beans.xml")
}

/// Value of the `bean-discovery-mode` attribute on the root `<beans>` element.
///
/// An empty descriptor, or one without the attribute, means `all`.
fn discovery_mode(xml: &str) -> Result<DiscoveryMode, String> {
    let mut rest = xml;
    let tag = loop {
        let Some(start) = rest.find("<beans") else {
            return Ok(DiscoveryMode::All);
        };
        let after = &rest[start + "<beans".len()..];
        if after
            .chars()
            .next()
            .is_some_and(|c| c == '>' || c == '/' || c.is_whitespace())
        {
            break after.split('>').next().unwrap_or(after);
        }
        rest = after;
    };

    let Some(at) = tag.find("bean-discovery-mode") else {
        return Ok(DiscoveryMode::All);
    };
    let value = tag[at + "bean-discovery-mode".len()..]
        .trim_start()
        .strip_prefix('=')
        .map(str::trim_start)
        .ok_or_else(|| "bean-discovery-mode has no value".to_owned())?;
    let quote = value
        .chars()
        .next()
        .filter(|c| *c == '"' || *c == '\'')
        .ok_or_else(|| "bean-discovery-mode value is not quoted".to_owned())?;
    let body = &value[1..];
    let end = body
        .find(quote)
        .ok_or_else(|| "unterminated bean-discovery-mode value".to_owned())?;
    body[..end].parse()
}

#[derive(Debug, Clone, Copy)]
struct Descriptor {
    mode: DiscoveryMode,
    top_level: bool,
}

/// Detects CDI bean archives.
///
/// A `beans.xml` makes the archive an explicit bean archive unless it says
/// `bean-discovery-mode="none"`; the archive's own descriptor wins over those of
/// bundled libraries. Without a descriptor, one class with a bean-defining annotation
/// makes it an implicit bean archive, so class detection is fast.
#[derive(Debug, Default)]
pub struct CdiSniffer {
    descriptor: Option<Descriptor>,
    annotated: bool,
}

impl CdiSniffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn disabled(&self) -> bool {
        self.descriptor
            .is_some_and(|d| d.mode == DiscoveryMode::None)
    }
}

impl Sniffer for CdiSniffer {
    fn name(&self) -> &'static str {
        CDI
    }

    fn detected_specifications(&self) -> BTreeSet<SpecificationId> {
        if self.disabled() {
            return BTreeSet::new();
        }
        BTreeSet::from([SpecificationId::from_static(CDI)])
    }

    fn triggered_by_class(&mut self, class: &ClassDescriptor) -> bool {
        if class.annotations.iter().any(|a| is_bean_defining(&a.type_name)) {
            self.annotated = true;
            return true;
        }
        false
    }

    fn triggered_by_descriptor(&mut self, name: &str, content: &[u8]) -> bool {
        if !is_beans_xml(name) {
            return false;
        }
        let mode = match std::str::from_utf8(content)
            .map_err(|e| e.to_string())
            .and_then(discovery_mode)
        {
            Ok(mode) => mode,
            Err(err) => {
                tracing::warn!(descriptor = name, error = %err, "unreadable beans.xml ignored");
                return false;
            }
        };
        let top_level = !name.contains("!/");
        if self
            .descriptor
            .is_none_or(|existing| top_level && !existing.top_level)
        {
            self.descriptor = Some(Descriptor { mode, top_level });
        }
        mode != DiscoveryMode::None
    }

    fn is_fast_detection(&self) -> bool {
        true
    }

    fn deployment_data(&self) -> BTreeMap<String, String> {
        let (kind, mode) = match self.descriptor {
            Some(d) if d.mode == DiscoveryMode::None => {
                return BTreeMap::from([(
                    DISCOVERY_MODE_KEY.to_owned(),
                    DiscoveryMode::None.as_str().to_owned(),
                )]);
            }
            Some(d) => (BeanArchiveKind::Explicit, d.mode),
            None if self.annotated => (BeanArchiveKind::Implicit, DiscoveryMode::Annotated),
            None => return BTreeMap::new(),
        };
        BTreeMap::from([
            (BEAN_ARCHIVE_KEY.to_owned(), kind.as_str().to_owned()),
            (DISCOVERY_MODE_KEY.to_owned(), mode.as_str().to_owned()),
        ])
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use apphost::testing::ClassFileBuilder;

    fn class(builder: ClassFileBuilder) -> ClassDescriptor {
        ClassDescriptor::parse(&builder.build()).unwrap()
    }

    #[test]
    fn discovery_mode_attribute() {
        assert_eq!(discovery_mode(""), Ok(DiscoveryMode::All));
        assert_eq!(discovery_mode("<beans/>"), Ok(DiscoveryMode::All));
        assert_eq!(
            discovery_mode(
                "<?xml version=\"1.0\"?>\n<beans xmlns=\"https://jakarta.ee/xml/ns/jakartaee\"\n  \
                 bean-discovery-mode = 'annotated' version=\"3.0\">\n</beans>"
            ),
            Ok(DiscoveryMode::Annotated)
        );
        assert_eq!(
            discovery_mode("<beans bean-discovery-mode=\"none\"></beans>"),
            Ok(DiscoveryMode::None)
        );
        assert!(discovery_mode("<beans bean-discovery-mode=\"some\"/>").is_err());
        assert!(discovery_mode("<beans bean-discovery-mode=all/>").is_err());
    }

    #[test]
    fn bean_defining_annotations_in_both_namespaces() {
        assert!(is_bean_defining("javax.enterprise.context.RequestScoped"));
        assert!(is_bean_defining("jakarta.interceptor.Interceptor"));
        assert!(!is_bean_defining("jakarta.inject.Inject"));
        assert!(!is_bean_defining("com.acme.enterprise.context.Dependent"));
    }

    #[test]
    fn implicit_archive_from_annotations() {
        let mut sniffer = CdiSniffer::new();
        assert!(!sniffer.triggered_by_class(&class(ClassFileBuilder::new("com.acme.Util"))));
        assert!(sniffer.triggered_by_class(&class(
            ClassFileBuilder::new("com.acme.Cart").annotation("jakarta.enterprise.context.SessionScoped"),
        )));
        let data = sniffer.deployment_data();
        assert_eq!(data[BEAN_ARCHIVE_KEY], "implicit");
        assert_eq!(data[DISCOVERY_MODE_KEY], "annotated");
        assert_eq!(sniffer.detected_specifications().len(), 1);
    }

    #[test]
    fn top_level_descriptor_wins_over_library() {
        let mut sniffer = CdiSniffer::new();
        assert!(sniffer.triggered_by_descriptor(
            "WEB-INF/lib/lib.jar!/META-INF/beans.xml",
            b"<beans bean-discovery-mode=\"all\"/>",
        ));
        assert!(sniffer.triggered_by_descriptor(
            "WEB-INF/beans.xml",
            b"<beans bean-discovery-mode=\"annotated\"/>",
        ));
        assert!(sniffer.triggered_by_descriptor("META-INF/beans.xml", b"<beans/>"));

        let data = sniffer.deployment_data();
        assert_eq!(data[BEAN_ARCHIVE_KEY], "explicit");
        assert_eq!(data[DISCOVERY_MODE_KEY], "annotated");
    }

    #[test]
    fn discovery_mode_none_disables_the_archive() {
        let mut sniffer = CdiSniffer::new();
        assert!(!sniffer.triggered_by_descriptor(
            "META-INF/beans.xml",
            b"<beans bean-discovery-mode=\"none\"/>",
        ));
        assert!(sniffer.triggered_by_class(&class(
            ClassFileBuilder::new("com.acme.Cart").annotation("javax.enterprise.context.Dependent"),
        )));
        assert!(sniffer.detected_specifications().is_empty());
        let data = sniffer.deployment_data();
        assert_eq!(data.get(DISCOVERY_MODE_KEY).map(String::as_str), Some("none"));
        assert!(!data.contains_key(BEAN_ARCHIVE_KEY));
    }

    #[test]
    fn other_descriptors_and_bad_content_are_ignored() {
        let mut sniffer = CdiSniffer::new();
        assert!(!sniffer.triggered_by_descriptor("WEB-INF/web.xml", b"<web-app/>"));
        assert!(!sniffer.triggered_by_descriptor("META-INF/beans.xml", &[0xff]));
        assert!(!sniffer.triggered_by_descriptor(
            "META-INF/beans.xml",
            b"<beans bean-discovery-mode=\"maybe\"/>",
        ));
        assert!(sniffer.deployment_data().is_empty());
    }
}
