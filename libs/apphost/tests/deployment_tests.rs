#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Archives on disk: packaged and exploded readers, the sniffing pipeline over them and
//! full deployments with a properties side-file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use apphost::archive::{ArchiveItem, ExplodedArchive, open_archive};
use apphost::deployment::{PropertiesFileRetriever, SniffingPipeline};
use apphost::testing::{ClassFileBuilder, ProbeModule, jar_bytes, journal};
use apphost::{
    ArchiveContent, ClassDescriptor, DeploymentDescriptor, DeploymentError, Module, ModuleCtx,
    ModuleManager, RegistryBuilder, Sniffer, SpecificationId,
};

const MARKED: &str = "com.acme.Marked";

/// Fast-detecting sniffer for classes annotated with `@com.acme.Marked`.
#[derive(Default)]
struct MarkedSniffer {
    classes: Vec<String>,
}

impl Sniffer for MarkedSniffer {
    fn name(&self) -> &'static str {
        "marked"
    }

    fn detected_specifications(&self) -> BTreeSet<SpecificationId> {
        BTreeSet::from([SpecificationId::from_static("marked")])
    }

    fn triggered_by_class(&mut self, class: &ClassDescriptor) -> bool {
        if class.has_annotation(MARKED) {
            self.classes.push(class.name.clone());
            return true;
        }
        false
    }

    fn is_fast_detection(&self) -> bool {
        true
    }

    fn deployment_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("marked.first".to_owned(), self.classes[0].clone())])
    }
}

struct MarkedModule;

#[async_trait]
impl Module for MarkedModule {
    fn name(&self) -> &'static str {
        "marked"
    }

    fn sniffer(&self) -> Option<Box<dyn Sniffer>> {
        Some(Box::new(MarkedSniffer::default()))
    }

    async fn start(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }
}

fn war_entries() -> Vec<(&'static str, Vec<u8>)> {
    let library = jar_bytes(&[
        ("META-INF/beans.xml", b"<beans/>".to_vec()),
        (
            "com/lib/Util.class",
            ClassFileBuilder::new("com.lib.Util").build(),
        ),
    ]);
    vec![
        (
            "WEB-INF/classes/com/acme/Shop.class",
            ClassFileBuilder::new("com.acme.Shop").annotation(MARKED).build(),
        ),
        (
            "WEB-INF/classes/com/acme/Cart.class",
            ClassFileBuilder::new("com.acme.Cart").annotation(MARKED).build(),
        ),
        ("WEB-INF/classes/com/acme/Broken.class", b"not a class".to_vec()),
        ("WEB-INF/web.xml", b"<web-app/>".to_vec()),
        ("WEB-INF/lib/lib.jar", library),
        ("index.html", b"<html/>".to_vec()),
    ]
}

fn write_war(dir: &Path, file: &str) -> std::path::PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, jar_bytes(&war_entries())).unwrap();
    path
}

fn write_exploded(dir: &Path) -> std::path::PathBuf {
    let root = dir.join("exploded");
    for (name, bytes) in war_entries() {
        let target = root.join(name);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(target, bytes).unwrap();
    }
    root
}

fn walk_names(archive: &dyn ArchiveContent) -> (BTreeSet<String>, apphost::archive::WalkStats) {
    let mut names = BTreeSet::new();
    let stats = archive
        .walk(&mut |item| {
            names.insert(match item {
                ArchiveItem::Class(class) => class.name.clone(),
                ArchiveItem::Descriptor { name, .. } => name.to_owned(),
            });
        })
        .unwrap();
    (names, stats)
}

#[test]
fn packaged_and_exploded_archives_yield_the_same_items() {
    let dir = tempfile::tempdir().unwrap();
    let packaged = open_archive(&write_war(dir.path(), "shop.war")).unwrap();
    let exploded = open_archive(&write_exploded(dir.path())).unwrap();

    let (packaged_names, packaged_stats) = walk_names(packaged.as_ref());
    let (exploded_names, exploded_stats) = walk_names(exploded.as_ref());

    let expected: BTreeSet<String> = [
        "com.acme.Shop",
        "com.acme.Cart",
        "com.lib.Util",
        "WEB-INF/web.xml",
        "WEB-INF/lib/lib.jar!/META-INF/beans.xml",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect();
    assert_eq!(packaged_names, expected);
    assert_eq!(exploded_names, expected);

    assert_eq!(packaged_stats, exploded_stats);
    assert_eq!(packaged_stats.classes, 3);
    assert_eq!(packaged_stats.descriptors, 2);
    assert_eq!(packaged_stats.skipped, 1);

    assert_eq!(packaged.default_name(), "shop");
    assert_eq!(ExplodedArchive::new(dir.path().join("exploded")).default_name(), "exploded");
}

#[test]
fn fast_detection_changes_call_count_not_result() {
    let dir = tempfile::tempdir().unwrap();
    let archive = open_archive(&write_war(dir.path(), "shop.war")).unwrap();

    let fast = SniffingPipeline::new(true)
        .scan(archive.as_ref(), vec![Box::new(MarkedSniffer::default())])
        .unwrap();
    let full = SniffingPipeline::new(false)
        .scan(archive.as_ref(), vec![Box::new(MarkedSniffer::default())])
        .unwrap();

    assert_eq!(fast.specifications, full.specifications);
    assert_eq!(fast.data, full.data);
    assert_eq!(fast.triggered, vec!["marked"]);
    assert!(fast.invocations["marked"] < full.invocations["marked"]);
}

#[test]
fn non_zip_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake.war");
    std::fs::write(&path, b"plain text").unwrap();
    assert!(open_archive(&path).is_err());
}

#[tokio::test]
async fn side_file_properties_feed_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let war = write_war(dir.path(), "shop.war");
    std::fs::write(
        dir.path().join("shop.war.properties"),
        "# deployment overrides\ncontext-root = store\nowner: ops\\\n  -team\n",
    )
    .unwrap();

    let j = journal();
    let probe = Arc::new(ProbeModule::new("probe", &["marked"], &j));
    let registry = RegistryBuilder::new()
        .with(Arc::new(MarkedModule))
        .with(probe.clone())
        .build_topo_sorted()
        .unwrap();
    let manager = ModuleManager::builder(registry)
        .retriever(Arc::new(PropertiesFileRetriever))
        .build();
    manager.start_modules().await.unwrap();

    let outcome = manager
        .deploy(&DeploymentDescriptor::new(&war))
        .await
        .unwrap();
    let record = outcome.record;
    assert_eq!(record.name, "shop");
    assert_eq!(record.context_root, "/store");
    assert_eq!(record.data("owner"), Some("ops-team"));
    assert!(record.has_specification("marked"));
    assert!(record.data("marked.first").is_some());
    assert_eq!(record.stats.classes, 3);
    assert!(probe.seen_records.lock().contains_key("shop"));

    assert!(manager.stop_modules().await.is_success());
}

#[tokio::test]
async fn malformed_side_file_fails_the_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let war = write_war(dir.path(), "shop.war");
    std::fs::write(dir.path().join("shop.war.properties"), "key=\\uZZZZ\n").unwrap();

    let j = journal();
    let registry = RegistryBuilder::new()
        .with(Arc::new(ProbeModule::new("probe", &[], &j)))
        .build_topo_sorted()
        .unwrap();
    let manager = ModuleManager::builder(registry)
        .retriever(Arc::new(PropertiesFileRetriever))
        .build();
    manager.start_modules().await.unwrap();

    let err = manager
        .deploy(&DeploymentDescriptor::new(&war))
        .await
        .err()
        .unwrap();
    match err {
        DeploymentError::Retriever {
            retriever,
            deployment,
            ..
        } => {
            assert_eq!(retriever, "properties-file");
            assert_eq!(deployment, "shop");
        }
        other => panic!("expected Retriever error, got {other:?}"),
    }
    assert!(manager.deployments().is_empty());
    assert!(
        j.lock().iter().all(|e| !e.starts_with("register:")),
        "no module may see a failed deployment"
    );
    assert!(manager.stop_modules().await.is_success());
}
