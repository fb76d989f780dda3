//! Minimal JVM class-file reader.
//!
//! Only what sniffers need is extracted: the class name, its super class and interfaces,
//! access flags, class-level runtime-visible annotations (with element values) and the
//! set of annotation types used on fields and methods. Code attributes are skipped.

use std::collections::{BTreeMap, BTreeSet};

const MAGIC: u32 = 0xCAFE_BABE;
const MAX_ANNOTATION_DEPTH: usize = 32;
const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_ANNOTATION: u16 = 0x2000;

#[derive(Debug, thiserror::Error)]
pub enum ClassFileError {
    #[error("not a class file (magic {0:#010x})")]
    BadMagic(u32),
    #[error("class file truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("invalid constant pool tag {tag} at index {index}")]
    InvalidConstantTag { tag: u8, index: u16 },
    #[error("constant pool index {0} is out of range or has the wrong kind")]
    BadConstantRef(u16),
    #[error("invalid annotation element tag {0:#04x}")]
    InvalidElementTag(u8),
    #[error("annotations nested deeper than 32 levels")]
    NestingTooDeep,
}

/// Value of an annotation element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationValue {
    String(String),
    /// Primitive constant rendered as text (`42`, `true`, `x`, `1.5`).
    Constant(String),
    Enum {
        type_name: String,
        constant: String,
    },
    Class(String),
    Annotation(Box<Annotation>),
    Array(Vec<AnnotationValue>),
}

/// A runtime-visible annotation with its explicitly present elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub type_name: String,
    pub elements: BTreeMap<String, AnnotationValue>,
}

impl Annotation {
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            elements: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: AnnotationValue) -> Self {
        self.elements.insert(name.into(), value);
        self
    }

    /// String value of element `name`, if it is a plain string.
    #[must_use]
    pub fn string_value(&self, name: &str) -> Option<&str> {
        match self.elements.get(name)? {
            AnnotationValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// What sniffers see of one compiled class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassDescriptor {
    /// Binary name in dotted form, e.g. `com.acme.api.OrdersResource`.
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access_flags: u16,
    pub annotations: Vec<Annotation>,
    /// Annotation types found on any field or method of the class.
    pub member_annotations: BTreeSet<String>,
}

impl ClassDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            access_flags: ACC_PUBLIC,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_super(mut self, super_name: impl Into<String>) -> Self {
        self.super_name = Some(super_name.into());
        self
    }

    #[must_use]
    pub fn with_interface(mut self, iface: impl Into<String>) -> Self {
        self.interfaces.push(iface.into());
        self
    }

    #[must_use]
    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    #[must_use]
    pub fn with_member_annotation(mut self, type_name: impl Into<String>) -> Self {
        self.member_annotations.insert(type_name.into());
        self
    }

    /// Parse a `.class` file.
    ///
    /// # Errors
    /// Returns `ClassFileError` if the bytes are not a well-formed class file.
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        ClassFileParser::new(bytes).parse()
    }

    #[must_use]
    pub fn annotation(&self, type_name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.type_name == type_name)
    }

    #[must_use]
    pub fn has_annotation(&self, type_name: &str) -> bool {
        self.annotation(type_name).is_some()
    }

    #[must_use]
    pub fn has_member_annotation(&self, type_name: &str) -> bool {
        self.member_annotations.contains(type_name)
    }

    #[must_use]
    pub fn extends(&self, super_name: &str) -> bool {
        self.super_name.as_deref() == Some(super_name)
    }

    #[must_use]
    pub fn implements(&self, iface: &str) -> bool {
        self.interfaces.iter().any(|i| i == iface)
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access_flags & ACC_ABSTRACT != 0
    }

    #[must_use]
    pub fn is_annotation_type(&self) -> bool {
        self.access_flags & ACC_ANNOTATION != 0
    }
}

/// `a/b/C` → `a.b.C`
fn internal_to_binary(name: &str) -> String {
    name.replace('/', ".")
}

/// `La/b/C;` → `a.b.C`; anything else (primitives, arrays) only gets its slashes replaced.
fn descriptor_to_binary(desc: &str) -> String {
    desc.strip_prefix('L')
        .and_then(|d| d.strip_suffix(';'))
        .map_or_else(|| internal_to_binary(desc), internal_to_binary)
}

enum Constant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    Other,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ClassFileError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassFileError::Truncated { offset: self.pos })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFileError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ClassFileError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, ClassFileError> {
        let hi = u64::from(self.u32()?);
        let lo = u64::from(self.u32()?);
        Ok((hi << 32) | lo)
    }
}

struct ClassFileParser<'a> {
    reader: Reader<'a>,
    pool: Vec<Constant>,
}

impl<'a> ClassFileParser<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            reader: Reader::new(bytes),
            pool: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<ClassDescriptor, ClassFileError> {
        let magic = self.reader.u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        let _minor = self.reader.u16()?;
        let _major = self.reader.u16()?;
        self.read_constant_pool()?;

        let access_flags = self.reader.u16()?;
        let this_class = self.reader.u16()?;
        let super_class = self.reader.u16()?;
        let name = internal_to_binary(self.class_name(this_class)?);
        let super_name = if super_class == 0 {
            None
        } else {
            Some(internal_to_binary(self.class_name(super_class)?))
        };

        let iface_count = self.reader.u16()?;
        let mut interfaces = Vec::with_capacity(usize::from(iface_count));
        for _ in 0..iface_count {
            let idx = self.reader.u16()?;
            interfaces.push(internal_to_binary(self.class_name(idx)?));
        }

        let mut member_annotations = BTreeSet::new();
        // fields, then methods: identical layout
        for _ in 0..2 {
            let count = self.reader.u16()?;
            for _ in 0..count {
                let _access = self.reader.u16()?;
                let _name = self.reader.u16()?;
                let _descriptor = self.reader.u16()?;
                for a in self.read_attributes()? {
                    member_annotations.insert(a.type_name);
                }
            }
        }

        let annotations = self.read_attributes()?;

        Ok(ClassDescriptor {
            name,
            super_name,
            interfaces,
            access_flags,
            annotations,
            member_annotations,
        })
    }

    fn read_constant_pool(&mut self) -> Result<(), ClassFileError> {
        let count = self.reader.u16()?;
        // index 0 is unused by the format
        self.pool.push(Constant::Other);
        let mut index: u16 = 1;
        while index < count {
            let tag = self.reader.u8()?;
            let (constant, slots) = match tag {
                1 => {
                    let len = self.reader.u16()?;
                    let raw = self.reader.bytes(usize::from(len))?;
                    (Constant::Utf8(String::from_utf8_lossy(raw).into_owned()), 1)
                }
                3 => (Constant::Integer(i32::from_be_bytes(self.reader.u32()?.to_be_bytes())), 1),
                4 => (Constant::Float(f32::from_bits(self.reader.u32()?)), 1),
                5 => (Constant::Long(i64::from_be_bytes(self.reader.u64()?.to_be_bytes())), 2),
                6 => (Constant::Double(f64::from_bits(self.reader.u64()?)), 2),
                7 => (Constant::Class(self.reader.u16()?), 1),
                8 | 16 | 19 | 20 => {
                    self.reader.u16()?;
                    (Constant::Other, 1)
                }
                9..=12 | 17 | 18 => {
                    self.reader.u32()?;
                    (Constant::Other, 1)
                }
                15 => {
                    self.reader.bytes(3)?;
                    (Constant::Other, 1)
                }
                _ => return Err(ClassFileError::InvalidConstantTag { tag, index }),
            };
            self.pool.push(constant);
            if slots == 2 {
                // long and double occupy two entries
                self.pool.push(Constant::Other);
            }
            index = index.saturating_add(slots);
        }
        Ok(())
    }

    fn constant(&self, idx: u16) -> Result<&Constant, ClassFileError> {
        self.pool
            .get(usize::from(idx))
            .ok_or(ClassFileError::BadConstantRef(idx))
    }

    fn utf8(&self, idx: u16) -> Result<&str, ClassFileError> {
        match self.constant(idx)? {
            Constant::Utf8(s) => Ok(s),
            _ => Err(ClassFileError::BadConstantRef(idx)),
        }
    }

    fn class_name(&self, idx: u16) -> Result<&str, ClassFileError> {
        match self.constant(idx)? {
            Constant::Class(name_idx) => self.utf8(*name_idx),
            _ => Err(ClassFileError::BadConstantRef(idx)),
        }
    }

    /// Reads an attribute table and returns the runtime-visible annotations it contains.
    fn read_attributes(&mut self) -> Result<Vec<Annotation>, ClassFileError> {
        let count = self.reader.u16()?;
        let mut out = Vec::new();
        for _ in 0..count {
            let name_idx = self.reader.u16()?;
            let len = self.reader.u32()?;
            let len = usize::try_from(len).map_err(|_| ClassFileError::Truncated {
                offset: self.reader.pos,
            })?;
            let body = self.reader.bytes(len)?;
            if self.utf8(name_idx)? == RUNTIME_VISIBLE_ANNOTATIONS {
                let mut r = Reader::new(body);
                let n = r.u16()?;
                for _ in 0..n {
                    out.push(self.read_annotation(&mut r, 0)?);
                }
            }
        }
        Ok(out)
    }

    fn read_annotation(&self, r: &mut Reader<'_>, depth: usize) -> Result<Annotation, ClassFileError> {
        if depth > MAX_ANNOTATION_DEPTH {
            return Err(ClassFileError::NestingTooDeep);
        }
        let type_idx = r.u16()?;
        let mut annotation = Annotation::new(descriptor_to_binary(self.utf8(type_idx)?));
        let pairs = r.u16()?;
        for _ in 0..pairs {
            let name_idx = r.u16()?;
            let name = self.utf8(name_idx)?.to_owned();
            let value = self.read_element_value(r, depth)?;
            annotation.elements.insert(name, value);
        }
        Ok(annotation)
    }

    fn read_element_value(
        &self,
        r: &mut Reader<'_>,
        depth: usize,
    ) -> Result<AnnotationValue, ClassFileError> {
        let tag = r.u8()?;
        let value = match tag {
            b's' => AnnotationValue::String(self.utf8(r.u16()?)?.to_owned()),
            b'B' | b'C' | b'I' | b'S' | b'Z' | b'D' | b'F' | b'J' => {
                AnnotationValue::Constant(self.render_constant(tag, r.u16()?)?)
            }
            b'e' => {
                let type_idx = r.u16()?;
                let const_idx = r.u16()?;
                AnnotationValue::Enum {
                    type_name: descriptor_to_binary(self.utf8(type_idx)?),
                    constant: self.utf8(const_idx)?.to_owned(),
                }
            }
            b'c' => AnnotationValue::Class(descriptor_to_binary(self.utf8(r.u16()?)?)),
            b'@' => AnnotationValue::Annotation(Box::new(self.read_annotation(r, depth + 1)?)),
            b'[' => {
                let n = r.u16()?;
                let mut values = Vec::with_capacity(usize::from(n));
                for _ in 0..n {
                    values.push(self.read_element_value(r, depth + 1)?);
                }
                AnnotationValue::Array(values)
            }
            other => return Err(ClassFileError::InvalidElementTag(other)),
        };
        Ok(value)
    }

    fn render_constant(&self, tag: u8, idx: u16) -> Result<String, ClassFileError> {
        let rendered = match (tag, self.constant(idx)?) {
            (b'Z', Constant::Integer(v)) => (*v != 0).to_string(),
            (b'C', Constant::Integer(v)) => u32::try_from(*v)
                .ok()
                .and_then(char::from_u32)
                .map_or_else(|| v.to_string(), |c| c.to_string()),
            (b'B' | b'I' | b'S', Constant::Integer(v)) => v.to_string(),
            (b'J', Constant::Long(v)) => v.to_string(),
            (b'F', Constant::Float(v)) => v.to_string(),
            (b'D', Constant::Double(v)) => v.to_string(),
            _ => return Err(ClassFileError::BadConstantRef(idx)),
        };
        Ok(rendered)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::testing::ClassFileBuilder;

    #[test]
    fn parses_names_and_hierarchy() {
        let bytes = ClassFileBuilder::new("com.acme.Orders")
            .super_class("javax.ws.rs.core.Application")
            .interface("java.io.Serializable")
            .build();

        let class = ClassDescriptor::parse(&bytes).unwrap();
        assert_eq!(class.name, "com.acme.Orders");
        assert!(class.extends("javax.ws.rs.core.Application"));
        assert!(class.implements("java.io.Serializable"));
        assert!(class.annotations.is_empty());
    }

    #[test]
    fn parses_class_annotation_with_string_element() {
        let bytes = ClassFileBuilder::new("com.acme.RestApp")
            .annotation_with_value("javax.ws.rs.ApplicationPath", "value", "/api")
            .annotation("javax.enterprise.context.ApplicationScoped")
            .build();

        let class = ClassDescriptor::parse(&bytes).unwrap();
        let path = class.annotation("javax.ws.rs.ApplicationPath").unwrap();
        assert_eq!(path.string_value("value"), Some("/api"));
        assert!(class.has_annotation("javax.enterprise.context.ApplicationScoped"));
    }

    #[test]
    fn collects_member_annotations() {
        let bytes = ClassFileBuilder::new("com.acme.Service")
            .method_annotation("doIt", "javax.inject.Inject")
            .build();

        let class = ClassDescriptor::parse(&bytes).unwrap();
        assert!(class.has_member_annotation("javax.inject.Inject"));
        assert!(class.annotations.is_empty());
    }

    #[test]
    fn class_without_super_is_object_root() {
        let bytes = ClassFileBuilder::new("java.lang.Object").no_super().build();
        let class = ClassDescriptor::parse(&bytes).unwrap();
        assert_eq!(class.super_name, None);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = ClassDescriptor::parse(&[0, 1, 2, 3, 4, 5, 6, 7]).unwrap_err();
        assert!(matches!(err, ClassFileError::BadMagic(0x0001_0203)));
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = ClassFileBuilder::new("com.acme.Cut").build();
        let err = ClassDescriptor::parse(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, ClassFileError::Truncated { .. }));
    }

    #[test]
    fn descriptor_conversion() {
        assert_eq!(descriptor_to_binary("Ljavax/ws/rs/Path;"), "javax.ws.rs.Path");
        assert_eq!(descriptor_to_binary("I"), "I");
        assert_eq!(internal_to_binary("a/b/C$D"), "a.b.C$D");
    }
}
