//! Just enough `web.xml` reading to find JAX-RS servlet mappings.
//!
//! Deployment descriptors are small and regular; elements are matched textually.
//! Namespace prefixes on element names are not supported.

/// Application class init-param names understood by JAX-RS servlet containers.
const APPLICATION_PARAMS: [&str; 2] = ["javax.ws.rs.Application", "jakarta.ws.rs.Application"];

/// Bodies of every `<tag>` element, in document order.
fn elements<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        // `<servlet` must not match `<servlet-mapping>`.
        let at_boundary = after
            .chars()
            .next()
            .is_some_and(|c| c == '>' || c == '/' || c.is_whitespace());
        if !at_boundary {
            rest = after;
            continue;
        }
        let Some(gt) = after.find('>') else {
            break;
        };
        if after[..gt].ends_with('/') {
            out.push("");
            rest = &after[gt + 1..];
            continue;
        }
        let body = &after[gt + 1..];
        let Some(end) = body.find(&close) else {
            break;
        };
        out.push(&body[..end]);
        rest = &body[end + close.len()..];
    }
    out
}

fn text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    elements(xml, tag).into_iter().next().map(str::trim)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WebXml {
    /// `(servlet-name, url-pattern)` for every mapped pattern.
    pub mappings: Vec<(String, String)>,
    /// `(servlet-name, application class)` for servlets configured through the
    /// `javax.ws.rs.Application` init-param.
    pub application_servlets: Vec<(String, String)>,
}

impl WebXml {
    pub fn parse(xml: &str) -> Self {
        let mut parsed = Self::default();
        for servlet in elements(xml, "servlet") {
            let Some(name) = text(servlet, "servlet-name") else {
                continue;
            };
            for param in elements(servlet, "init-param") {
                if !text(param, "param-name").is_some_and(|n| APPLICATION_PARAMS.contains(&n)) {
                    continue;
                }
                if let Some(class) = text(param, "param-value") {
                    parsed
                        .application_servlets
                        .push((name.to_owned(), class.to_owned()));
                }
            }
        }
        for mapping in elements(xml, "servlet-mapping") {
            let Some(name) = text(mapping, "servlet-name") else {
                continue;
            };
            for pattern in elements(mapping, "url-pattern") {
                parsed
                    .mappings
                    .push((name.to_owned(), pattern.trim().to_owned()));
            }
        }
        parsed
    }
}

/// `/api/*` → `/api`; exact patterns stay as they are.
pub fn strip_wildcard(pattern: &str) -> &str {
    let p = pattern.trim();
    p.strip_suffix("/*")
        .or_else(|| p.strip_suffix('*'))
        .unwrap_or(p)
}
