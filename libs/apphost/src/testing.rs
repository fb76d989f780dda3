//! Test helpers shared by this crate's unit tests and by plugin crates' tests
//! (enable the `test-support` feature).
//!
//! - [`ClassFileBuilder`] emits small but valid JVM class files.
//! - [`ProbeModule`] records every lifecycle call into a shared journal.
//! - [`jar_bytes`] packs entries into an in-memory zip archive.
//! - [`core_modules`] supplies the `logging` and `config` modules plugins depend on.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::context::ModuleCtx;
use crate::contracts::{DeploymentAware, EventListener, Module};
use crate::deployment::DeploymentRecord;
use crate::events::Event;
use crate::logging::EarlyLogBuffer;
use crate::runtime_objects::{ExposedObject, TypeKey};
use crate::system::{ConfigModule, LoggingModule};

// ========== class files ==========

const RVA: &str = "RuntimeVisibleAnnotations";

struct PendingAnnotation {
    type_name: String,
    string_elements: Vec<(String, String)>,
}

/// Builder for minimal class files (Java 8 format, no code attributes).
pub struct ClassFileBuilder {
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    access: u16,
    annotations: Vec<PendingAnnotation>,
    methods: Vec<(String, Vec<PendingAnnotation>)>,
}

#[derive(Default)]
struct Pool {
    entries: Vec<Vec<u8>>,
    utf8: HashMap<String, u16>,
    classes: HashMap<String, u16>,
}

impl Pool {
    fn next_index(&self) -> u16 {
        u16::try_from(self.entries.len() + 1).unwrap_or(u16::MAX)
    }

    fn utf8(&mut self, s: &str) -> u16 {
        if let Some(idx) = self.utf8.get(s) {
            return *idx;
        }
        let idx = self.next_index();
        let mut e = vec![1u8];
        e.extend_from_slice(&u16::try_from(s.len()).unwrap_or(u16::MAX).to_be_bytes());
        e.extend_from_slice(s.as_bytes());
        self.entries.push(e);
        self.utf8.insert(s.to_owned(), idx);
        idx
    }

    fn class(&mut self, binary_name: &str) -> u16 {
        let internal = binary_name.replace('.', "/");
        if let Some(idx) = self.classes.get(&internal) {
            return *idx;
        }
        let name_idx = self.utf8(&internal);
        let idx = self.next_index();
        let mut e = vec![7u8];
        e.extend_from_slice(&name_idx.to_be_bytes());
        self.entries.push(e);
        self.classes.insert(internal, idx);
        idx
    }
}

impl ClassFileBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            super_name: Some("java.lang.Object".to_owned()),
            interfaces: Vec::new(),
            access: crate::archive::classfile::ACC_PUBLIC,
            annotations: Vec::new(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn super_class(mut self, name: &str) -> Self {
        self.super_name = Some(name.to_owned());
        self
    }

    #[must_use]
    pub fn no_super(mut self) -> Self {
        self.super_name = None;
        self
    }

    #[must_use]
    pub fn interface(mut self, name: &str) -> Self {
        self.interfaces.push(name.to_owned());
        self
    }

    #[must_use]
    pub fn access(mut self, flags: u16) -> Self {
        self.access = flags;
        self
    }

    #[must_use]
    pub fn annotation(mut self, type_name: &str) -> Self {
        self.annotations.push(PendingAnnotation {
            type_name: type_name.to_owned(),
            string_elements: Vec::new(),
        });
        self
    }

    #[must_use]
    pub fn annotation_with_value(mut self, type_name: &str, element: &str, value: &str) -> Self {
        self.annotations.push(PendingAnnotation {
            type_name: type_name.to_owned(),
            string_elements: vec![(element.to_owned(), value.to_owned())],
        });
        self
    }

    #[must_use]
    pub fn method_annotation(mut self, method: &str, type_name: &str) -> Self {
        let pending = PendingAnnotation {
            type_name: type_name.to_owned(),
            string_elements: Vec::new(),
        };
        match self.methods.iter_mut().find(|(m, _)| m == method) {
            Some((_, list)) => list.push(pending),
            None => self.methods.push((method.to_owned(), vec![pending])),
        }
        self
    }

    fn encode_annotations(pool: &mut Pool, list: &[PendingAnnotation]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&u16::try_from(list.len()).unwrap_or(0).to_be_bytes());
        for a in list {
            let desc = format!("L{};", a.type_name.replace('.', "/"));
            body.extend_from_slice(&pool.utf8(&desc).to_be_bytes());
            body.extend_from_slice(
                &u16::try_from(a.string_elements.len())
                    .unwrap_or(0)
                    .to_be_bytes(),
            );
            for (name, value) in &a.string_elements {
                body.extend_from_slice(&pool.utf8(name).to_be_bytes());
                body.push(b's');
                body.extend_from_slice(&pool.utf8(value).to_be_bytes());
            }
        }
        body
    }

    fn encode_attribute(pool: &mut Pool, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&pool.utf8(RVA).to_be_bytes());
        out.extend_from_slice(&u32::try_from(body.len()).unwrap_or(0).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut pool = Pool::default();
        let this_idx = pool.class(&self.name);
        let super_idx = self.super_name.as_deref().map_or(0, |s| pool.class(s));
        let iface_idx: Vec<u16> = self.interfaces.iter().map(|i| pool.class(i)).collect();

        let mut methods = Vec::new();
        for (name, annotations) in &self.methods {
            let name_idx = pool.utf8(name);
            let desc_idx = pool.utf8("()V");
            let body = Self::encode_annotations(&mut pool, annotations);
            let attr = Self::encode_attribute(&mut pool, &body);
            methods.extend_from_slice(&crate::archive::classfile::ACC_PUBLIC.to_be_bytes());
            methods.extend_from_slice(&name_idx.to_be_bytes());
            methods.extend_from_slice(&desc_idx.to_be_bytes());
            methods.extend_from_slice(&1u16.to_be_bytes());
            methods.extend_from_slice(&attr);
        }

        let class_attr = if self.annotations.is_empty() {
            None
        } else {
            let body = Self::encode_annotations(&mut pool, &self.annotations);
            Some(Self::encode_attribute(&mut pool, &body))
        };

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABE_u32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&52u16.to_be_bytes());
        out.extend_from_slice(&pool.next_index().to_be_bytes());
        for e in &pool.entries {
            out.extend_from_slice(e);
        }
        out.extend_from_slice(&self.access.to_be_bytes());
        out.extend_from_slice(&this_idx.to_be_bytes());
        out.extend_from_slice(&super_idx.to_be_bytes());
        out.extend_from_slice(&u16::try_from(iface_idx.len()).unwrap_or(0).to_be_bytes());
        for i in iface_idx {
            out.extend_from_slice(&i.to_be_bytes());
        }
        // no fields
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&u16::try_from(self.methods.len()).unwrap_or(0).to_be_bytes());
        out.extend_from_slice(&methods);
        match class_attr {
            Some(attr) => {
                out.extend_from_slice(&1u16.to_be_bytes());
                out.extend_from_slice(&attr);
            }
            None => out.extend_from_slice(&0u16.to_be_bytes()),
        }
        out
    }
}

// ========== archives ==========

/// Pack `(entry name, content)` pairs into an in-memory zip (jar/war) file.
///
/// # Panics
/// Panics if the zip writer fails, which only happens on allocation failure.
#[must_use]
#[allow(clippy::expect_used)]
pub fn jar_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        zip.start_file(*name, options).expect("start zip entry");
        zip.write_all(content).expect("write zip entry");
    }
    zip.finish().expect("finish zip").into_inner()
}

// ========== modules ==========

/// `logging` (private buffer, caller's subscriber left alone) and `config`, in start order.
#[must_use]
pub fn core_modules() -> Vec<Arc<dyn Module>> {
    vec![
        Arc::new(LoggingModule::with_buffer(Arc::new(EarlyLogBuffer::new())).without_subscriber()),
        Arc::new(ConfigModule::new()),
    ]
}

/// Shared, ordered log of `"<event>:<module>"` strings.
pub type Journal = Arc<Mutex<Vec<String>>>;

#[must_use]
pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Configurable module that records each lifecycle call in a [`Journal`].
pub struct ProbeModule {
    name: &'static str,
    deps: &'static [&'static str],
    journal: Journal,
    fail_configure: bool,
    fail_start: bool,
    fail_stop: bool,
    fail_register: bool,
    fail_event: bool,
    panic_event: bool,
    exposed: Vec<(TypeKey, Arc<dyn Fn() -> ExposedObject + Send + Sync>)>,
    undeclared: Vec<Arc<dyn Fn() -> ExposedObject + Send + Sync>>,
    pub seen_records: Mutex<BTreeMap<String, Arc<DeploymentRecord>>>,
}

impl ProbeModule {
    #[must_use]
    pub fn new(name: &'static str, deps: &'static [&'static str], journal: &Journal) -> Self {
        Self {
            name,
            deps,
            journal: journal.clone(),
            fail_configure: false,
            fail_start: false,
            fail_stop: false,
            fail_register: false,
            fail_event: false,
            panic_event: false,
            exposed: Vec::new(),
            undeclared: Vec::new(),
            seen_records: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    #[must_use]
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    #[must_use]
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    #[must_use]
    pub fn failing_register(mut self) -> Self {
        self.fail_register = true;
        self
    }

    #[must_use]
    pub fn failing_events(mut self) -> Self {
        self.fail_event = true;
        self
    }

    #[must_use]
    pub fn panicking_events(mut self) -> Self {
        self.panic_event = true;
        self
    }

    /// Expose `object` as capability `T` once started.
    #[must_use]
    pub fn exposing<T>(mut self, object: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.exposed.push((
            TypeKey::of::<T>(),
            Arc::new(move || ExposedObject::new::<T>(object.clone())),
        ));
        self
    }

    /// Hand out `object` as capability `T` without listing `T` in `exposed_types()`.
    #[must_use]
    pub fn exposing_undeclared<T>(mut self, object: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.undeclared
            .push(Arc::new(move || ExposedObject::new::<T>(object.clone())));
        self
    }

    fn note(&self, what: &str) {
        self.journal.lock().push(format!("{what}:{}", self.name));
    }
}

#[async_trait]
impl Module for ProbeModule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn dependencies(&self) -> &'static [&'static str] {
        self.deps
    }

    fn exposed_types(&self) -> Vec<TypeKey> {
        self.exposed.iter().map(|(k, _)| *k).collect()
    }

    fn runtime_objects(&self) -> Vec<ExposedObject> {
        self.exposed
            .iter()
            .map(|(_, make)| make())
            .chain(self.undeclared.iter().map(|make| make()))
            .collect()
    }

    async fn configure(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.note("configure");
        if self.fail_configure {
            anyhow::bail!("{} rejected its configuration", self.name);
        }
        Ok(())
    }

    async fn start(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.note("start");
        if self.fail_start {
            anyhow::bail!("{} refused to start", self.name);
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.note("stop");
        if self.fail_stop {
            anyhow::bail!("{} refused to stop", self.name);
        }
        Ok(())
    }

    fn deployment_aware(&self) -> Option<&dyn DeploymentAware> {
        Some(self)
    }

    fn event_listener(&self) -> Option<&dyn EventListener> {
        Some(self)
    }
}

#[async_trait]
impl DeploymentAware for ProbeModule {
    async fn register_deployment(&self, record: &Arc<DeploymentRecord>) -> anyhow::Result<()> {
        self.note("register");
        if self.fail_register {
            anyhow::bail!("{} rejected deployment {}", self.name, record.name);
        }
        self.seen_records
            .lock()
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn unregister_deployment(&self, record: &Arc<DeploymentRecord>) -> anyhow::Result<()> {
        self.note("unregister");
        self.seen_records.lock().remove(&record.name);
        Ok(())
    }
}

#[async_trait]
impl EventListener for ProbeModule {
    async fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        self.note(&format!("event[{}]", event.code));
        assert!(!self.panic_event, "{} panicked on event", self.name);
        if self.fail_event {
            anyhow::bail!("{} failed to handle event", self.name);
        }
        Ok(())
    }
}
