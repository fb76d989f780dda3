use std::collections::{BTreeMap, BTreeSet};

use apphost::archive::{Annotation, ClassDescriptor};
use apphost::deployment::normalize_context_root;
use apphost::{Sniffer, SpecificationId};

use crate::web_xml::{WebXml, strip_wildcard};

pub const JAX_RS: &str = "jax-rs";

pub const APPLICATION_PATH_KEY: &str = "jaxrs.application-path";
pub const APPLICATION_CLASS_KEY: &str = "jaxrs.application-class";
/// Comma-separated root resource classes.
pub const RESOURCES_KEY: &str = "jaxrs.resources";

const NAMESPACES: [&str; 2] = ["javax.ws.rs", "jakarta.ws.rs"];

const WEB_XML: &str = "WEB-INF/web.xml";

/// `javax.ws.rs.<member>` or `jakarta.ws.rs.<member>`.
fn is_jaxrs_type(type_name: &str, member: &str) -> bool {
    NAMESPACES.iter().any(|ns| {
        type_name
            .strip_prefix(ns)
            .and_then(|rest| rest.strip_prefix('.'))
            == Some(member)
    })
}

fn jaxrs_annotation<'a>(class: &'a ClassDescriptor, member: &str) -> Option<&'a Annotation> {
    class
        .annotations
        .iter()
        .find(|a| is_jaxrs_type(&a.type_name, member))
}

/// Detects JAX-RS applications.
///
/// Triggers on `@ApplicationPath` classes, `Application` subclasses, root resources
/// (class-level `@Path`) and `web.xml` servlet mappings of a JAX-RS application. All
/// classes are needed to list resources, so this sniffer is not fast-detecting.
#[derive(Debug, Default)]
pub struct JaxRsSniffer {
    annotated_path: Option<String>,
    application_class: Option<String>,
    resources: BTreeSet<String>,
    web_xml: WebXml,
}

impl JaxRsSniffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_application_servlet(&self, servlet: &str) -> bool {
        servlet
            .strip_suffix(".core.Application")
            .is_some_and(|ns| NAMESPACES.contains(&ns))
            || self.application_class.as_deref() == Some(servlet)
            || self
                .web_xml
                .application_servlets
                .iter()
                .any(|(name, _)| name == servlet)
    }

    /// A `web.xml` mapping overrides `@ApplicationPath`.
    fn application_path(&self) -> Option<String> {
        self.web_xml
            .mappings
            .iter()
            .find(|(servlet, _)| self.is_application_servlet(servlet))
            .map(|(_, pattern)| strip_wildcard(pattern).to_owned())
            .or_else(|| self.annotated_path.clone())
            .map(|p| normalize_context_root(&p))
    }

    fn application_class(&self) -> Option<&str> {
        self.application_class.as_deref().or_else(|| {
            self.web_xml
                .application_servlets
                .first()
                .map(|(_, class)| class.as_str())
        })
    }
}

impl Sniffer for JaxRsSniffer {
    fn name(&self) -> &'static str {
        JAX_RS
    }

    fn detected_specifications(&self) -> BTreeSet<SpecificationId> {
        BTreeSet::from([SpecificationId::from_static(JAX_RS)])
    }

    fn triggered_by_class(&mut self, class: &ClassDescriptor) -> bool {
        let mut hit = false;

        if let Some(annotation) = jaxrs_annotation(class, "ApplicationPath") {
            if self.annotated_path.is_none() {
                self.annotated_path = Some(annotation.string_value("value").unwrap_or("").to_owned());
                self.application_class = Some(class.name.clone());
            }
            hit = true;
        }

        if class
            .super_name
            .as_deref()
            .is_some_and(|s| is_jaxrs_type(s, "core.Application"))
        {
            if self.application_class.is_none() {
                self.application_class = Some(class.name.clone());
            }
            hit = true;
        }

        if !class.is_interface() && jaxrs_annotation(class, "Path").is_some() {
            self.resources.insert(class.name.clone());
            hit = true;
        }

        hit
    }

    fn triggered_by_descriptor(&mut self, name: &str, content: &[u8]) -> bool {
        if name != WEB_XML {
            return false;
        }
        let Ok(xml) = std::str::from_utf8(content) else {
            tracing::debug!(descriptor = name, "web.xml is not UTF-8; ignored");
            return false;
        };
        self.web_xml = WebXml::parse(xml);
        self.web_xml
            .mappings
            .iter()
            .any(|(servlet, _)| self.is_application_servlet(servlet))
    }

    fn deployment_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        if let Some(path) = self.application_path() {
            data.insert(APPLICATION_PATH_KEY.to_owned(), path);
        }
        if let Some(class) = self.application_class() {
            data.insert(APPLICATION_CLASS_KEY.to_owned(), class.to_owned());
        }
        if !self.resources.is_empty() {
            let resources: Vec<&str> = self.resources.iter().map(String::as_str).collect();
            data.insert(RESOURCES_KEY.to_owned(), resources.join(","));
        }
        data
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use apphost::archive::classfile::{ACC_INTERFACE, ACC_PUBLIC};
    use apphost::testing::ClassFileBuilder;

    fn class(builder: ClassFileBuilder) -> ClassDescriptor {
        ClassDescriptor::parse(&builder.build()).unwrap()
    }

    #[test]
    fn application_path_annotation_and_resources() {
        let mut sniffer = JaxRsSniffer::new();
        assert!(sniffer.triggered_by_class(&class(
            ClassFileBuilder::new("com.acme.ShopApp")
                .super_class("jakarta.ws.rs.core.Application")
                .annotation_with_value("jakarta.ws.rs.ApplicationPath", "value", "api/"),
        )));
        assert!(sniffer.triggered_by_class(&class(
            ClassFileBuilder::new("com.acme.Orders").annotation("jakarta.ws.rs.Path"),
        )));
        assert!(sniffer.triggered_by_class(&class(
            ClassFileBuilder::new("com.acme.Carts").annotation("javax.ws.rs.Path"),
        )));
        assert!(!sniffer.triggered_by_class(&class(ClassFileBuilder::new("com.acme.Util"))));

        let data = sniffer.deployment_data();
        assert_eq!(data[APPLICATION_PATH_KEY], "/api");
        assert_eq!(data[APPLICATION_CLASS_KEY], "com.acme.ShopApp");
        assert_eq!(data[RESOURCES_KEY], "com.acme.Carts,com.acme.Orders");
    }

    #[test]
    fn resource_interfaces_and_method_paths_are_not_roots() {
        let mut sniffer = JaxRsSniffer::new();
        assert!(!sniffer.triggered_by_class(&class(
            ClassFileBuilder::new("com.acme.Api")
                .access(ACC_PUBLIC | ACC_INTERFACE)
                .annotation("jakarta.ws.rs.Path"),
        )));
        assert!(!sniffer.triggered_by_class(&class(
            ClassFileBuilder::new("com.acme.Sub").method_annotation("get", "jakarta.ws.rs.Path"),
        )));
        assert!(sniffer.deployment_data().is_empty());
    }

    #[test]
    fn web_xml_mapping_overrides_annotation() {
        let mut sniffer = JaxRsSniffer::new();
        sniffer.triggered_by_class(&class(
            ClassFileBuilder::new("com.acme.ShopApp")
                .super_class("javax.ws.rs.core.Application")
                .annotation_with_value("javax.ws.rs.ApplicationPath", "value", "api"),
        ));
        let xml = "<web-app><servlet-mapping><servlet-name>com.acme.ShopApp</servlet-name>\
                   <url-pattern>/v2/*</url-pattern></servlet-mapping></web-app>";
        assert!(sniffer.triggered_by_descriptor(WEB_XML, xml.as_bytes()));
        assert_eq!(sniffer.deployment_data()[APPLICATION_PATH_KEY], "/v2");
    }

    #[test]
    fn generic_application_servlet_in_web_xml() {
        let mut sniffer = JaxRsSniffer::new();
        let xml = "<web-app><servlet-mapping>\
                   <servlet-name>jakarta.ws.rs.core.Application</servlet-name>\
                   <url-pattern>/resources/*</url-pattern></servlet-mapping></web-app>";
        assert!(sniffer.triggered_by_descriptor(WEB_XML, xml.as_bytes()));
        assert_eq!(sniffer.deployment_data()[APPLICATION_PATH_KEY], "/resources");
        assert!(!sniffer.deployment_data().contains_key(APPLICATION_CLASS_KEY));
    }

    #[test]
    fn unrelated_descriptors_do_not_trigger() {
        let mut sniffer = JaxRsSniffer::new();
        assert!(!sniffer.triggered_by_descriptor("META-INF/beans.xml", b"<beans/>"));
        let plain = "<web-app><servlet-mapping><servlet-name>default</servlet-name>\
                     <url-pattern>/</url-pattern></servlet-mapping></web-app>";
        assert!(!sniffer.triggered_by_descriptor(WEB_XML, plain.as_bytes()));
        assert!(!sniffer.triggered_by_descriptor(WEB_XML, &[0xff, 0xfe]));
    }
}
