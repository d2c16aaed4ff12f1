//! jarshade Test Utilities
//!
//! This crate provides builders for small but structurally valid class files
//! and jars, plus a reader to inspect relocated output.

use std::{
    collections::HashMap,
    io::{Cursor, Read, Write},
};

use zip::{write::FileOptions, CompressionMethod, DateTime, ZipArchive, ZipWriter};

const MAGIC: u32 = 0xCAFE_BABE;
/// Java 8
const MAJOR_VERSION: u16 = 52;
/// Java 16, the first to know `Record`
const RECORD_MAJOR_VERSION: u16 = 60;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_SUPER: u16 = 0x0020;
const ACC_ABSTRACT: u16 = 0x0400;

const TAG_UTF8: u8 = 1;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_METHOD: u8 = 10;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_TYPE: u8 = 16;

const OP_LDC: u8 = 0x12;
const OP_ARETURN: u8 = 0xb0;
const OP_RETURN: u8 = 0xb1;

/// `supertype_target` pointing at the superclass
const TARGET_SUPERCLASS: [u8; 3] = [0x10, 0xff, 0xff];

/// Element value of an annotation built by [`ClassFileBuilder`]
#[derive(Debug, Clone, Copy)]
pub enum AnnotationValue<'v> {
    /// `s`, a string constant
    Str(&'v str),
    /// `e`, type descriptor and constant name
    Enum(&'v str, &'v str),
    /// `c`, a return descriptor such as `La/C;` or `V`
    Class(&'v str),
}

/// Builder for class files with the kinds of references relocation cares
/// about. UTF-8 and class constants are shared, the way javac emits them.
pub struct ClassFileBuilder {
    name: String,
    pool: Vec<Vec<u8>>,
    utf8s: HashMap<String, u16>,
    classes: HashMap<String, u16>,
    this_class: u16,
    super_class: u16,
    major_version: u16,
    interfaces: Vec<u16>,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
    annotations: Vec<Vec<u8>>,
    visible_type_annotations: Vec<Vec<u8>>,
    invisible_type_annotations: Vec<Vec<u8>>,
    record_components: Vec<Vec<u8>>,
}

impl ClassFileBuilder {
    /// Create a public abstract class extending `java/lang/Object`
    pub fn new(internal_name: &str) -> Self {
        let mut builder = Self {
            name: internal_name.to_owned(),
            pool: Vec::new(),
            utf8s: HashMap::new(),
            classes: HashMap::new(),
            this_class: 0,
            super_class: 0,
            major_version: MAJOR_VERSION,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            annotations: Vec::new(),
            visible_type_annotations: Vec::new(),
            invisible_type_annotations: Vec::new(),
            record_components: Vec::new(),
        };
        builder.this_class = builder.class(internal_name);
        builder.super_class = builder.class("java/lang/Object");
        builder
    }

    pub fn super_class(mut self, internal_name: &str) -> Self {
        self.super_class = self.class(internal_name);
        self
    }

    pub fn interface(mut self, internal_name: &str) -> Self {
        let index = self.class(internal_name);
        self.interfaces.push(index);
        self
    }

    pub fn field(mut self, name: &str, descriptor: &str) -> Self {
        let member = self.member(ACC_PUBLIC, name, descriptor, Vec::new());
        self.fields.push(member);
        self
    }

    /// Field with a generic `Signature` attribute
    pub fn field_with_signature(mut self, name: &str, descriptor: &str, signature: &str) -> Self {
        let attribute_name = self.utf8("Signature");
        let signature = self.utf8(signature);
        let attribute = attribute(attribute_name, &signature.to_be_bytes());
        let member = self.member(ACC_PUBLIC, name, descriptor, vec![attribute]);
        self.fields.push(member);
        self
    }

    pub fn abstract_method(mut self, name: &str, descriptor: &str) -> Self {
        let member = self.member(ACC_PUBLIC | ACC_ABSTRACT, name, descriptor, Vec::new());
        self.methods.push(member);
        self
    }

    /// Instance method `String name()` returning the string literal `value`,
    /// with a `LocalVariableTable` entry for `this`
    pub fn string_method(mut self, name: &str, value: &str) -> Self {
        let value_utf8 = self.utf8(value);
        let literal = self.push(TAG_STRING, &value_utf8.to_be_bytes());
        let literal = u8::try_from(literal).expect("string constant out of ldc range");
        let code = [OP_LDC, literal, OP_ARETURN];

        let lvt_name = self.utf8("LocalVariableTable");
        let this_name = self.utf8("this");
        let this_descriptor = format!("L{};", self.name);
        let this_descriptor = self.utf8(&this_descriptor);
        let mut lvt = Vec::new();
        lvt.extend_from_slice(&1u16.to_be_bytes());
        lvt.extend_from_slice(&0u16.to_be_bytes());
        lvt.extend_from_slice(&(code.len() as u16).to_be_bytes());
        lvt.extend_from_slice(&this_name.to_be_bytes());
        lvt.extend_from_slice(&this_descriptor.to_be_bytes());
        lvt.extend_from_slice(&0u16.to_be_bytes());

        let lvt = attribute(lvt_name, &lvt);
        let code_attribute = self.code(1, 1, &code, &[lvt]);
        let member = self.member(ACC_PUBLIC, name, "()Ljava/lang/String;", vec![code_attribute]);
        self.methods.push(member);
        self
    }

    /// Unreferenced `CONSTANT_Class`, like the ones `instanceof` or `checkcast` use
    pub fn class_ref(mut self, internal_name: &str) -> Self {
        self.class(internal_name);
        self
    }

    /// `CONSTANT_Methodref` to `owner.name descriptor`
    pub fn method_ref(mut self, owner: &str, name: &str, descriptor: &str) -> Self {
        let owner = self.class(owner);
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let name_and_type = self.push_pair(TAG_NAME_AND_TYPE, name, descriptor);
        self.push_pair(TAG_METHOD, owner, name_and_type);
        self
    }

    /// `CONSTANT_MethodType`, as loaded by `ldc` or used in bootstrap arguments
    pub fn method_type(mut self, descriptor: &str) -> Self {
        let descriptor = self.utf8(descriptor);
        self.push(TAG_METHOD_TYPE, &descriptor.to_be_bytes());
        self
    }

    /// Class-level runtime-visible annotation without elements
    pub fn annotation(mut self, type_descriptor: &str) -> Self {
        let annotation = self.encode_annotation(type_descriptor, &[]);
        self.annotations.push(annotation);
        self
    }

    /// Class-level runtime-visible annotation with a single element
    pub fn annotation_with(
        mut self,
        type_descriptor: &str,
        element: &str,
        value: AnnotationValue<'_>,
    ) -> Self {
        let annotation = self.encode_annotation(type_descriptor, &[(element, value)]);
        self.annotations.push(annotation);
        self
    }

    /// Type annotation on the `extends` clause, in the visible or the
    /// invisible attribute
    pub fn type_annotation(mut self, type_descriptor: &str, visible: bool) -> Self {
        let mut annotation = TARGET_SUPERCLASS.to_vec();
        annotation.push(0); // type_path
        annotation.extend_from_slice(&self.encode_annotation(type_descriptor, &[]));
        if visible {
            self.visible_type_annotations.push(annotation);
        } else {
            self.invisible_type_annotations.push(annotation);
        }
        self
    }

    /// Annotation interface element `name` with an `AnnotationDefault`
    pub fn annotation_element(
        mut self,
        name: &str,
        return_descriptor: &str,
        default: AnnotationValue<'_>,
    ) -> Self {
        let attribute_name = self.utf8("AnnotationDefault");
        let value = self.encode_value(default);
        let attribute = attribute(attribute_name, &value);
        let descriptor = format!("(){return_descriptor}");
        let member = self.member(ACC_PUBLIC | ACC_ABSTRACT, name, &descriptor, vec![attribute]);
        self.methods.push(member);
        self
    }

    /// Abstract method whose first parameter carries `annotation_type`
    pub fn parameter_annotation(
        mut self,
        name: &str,
        descriptor: &str,
        annotation_type: &str,
        visible: bool,
    ) -> Self {
        let attribute_name = self.utf8(if visible {
            "RuntimeVisibleParameterAnnotations"
        } else {
            "RuntimeInvisibleParameterAnnotations"
        });
        let mut body = vec![1]; // num_parameters
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&self.encode_annotation(annotation_type, &[]));
        let attribute = attribute(attribute_name, &body);
        let member = self.member(ACC_PUBLIC | ACC_ABSTRACT, name, descriptor, vec![attribute]);
        self.methods.push(member);
        self
    }

    /// Method `void name()` declaring one generic local in slot 1, listed in
    /// both `LocalVariableTable` and `LocalVariableTypeTable`
    pub fn generic_local(mut self, name: &str, local: &str, descriptor: &str, signature: &str) -> Self {
        let code = [OP_RETURN];
        let local_name = self.utf8(local);
        let mut tables = Vec::new();
        for (table, text) in [
            ("LocalVariableTable", descriptor),
            ("LocalVariableTypeTable", signature),
        ] {
            let table_name = self.utf8(table);
            let text = self.utf8(text);
            let mut body = Vec::new();
            body.extend_from_slice(&1u16.to_be_bytes());
            body.extend_from_slice(&0u16.to_be_bytes());
            body.extend_from_slice(&(code.len() as u16).to_be_bytes());
            body.extend_from_slice(&local_name.to_be_bytes());
            body.extend_from_slice(&text.to_be_bytes());
            body.extend_from_slice(&1u16.to_be_bytes());
            tables.push(attribute(table_name, &body));
        }

        let code_attribute = self.code(1, 2, &code, &tables);
        let member = self.member(ACC_PUBLIC, name, "()V", vec![code_attribute]);
        self.methods.push(member);
        self
    }

    /// Record component, with a `Signature` attribute when `signature` is set.
    /// Classes with components are written as Java 16 class files.
    pub fn record_component(mut self, name: &str, descriptor: &str, signature: Option<&str>) -> Self {
        let mut attributes = Vec::new();
        if let Some(signature) = signature {
            let attribute_name = self.utf8("Signature");
            let signature = self.utf8(signature);
            attributes.push(attribute(attribute_name, &signature.to_be_bytes()));
        }
        let component = self.member_body(None, name, descriptor, attributes);
        self.record_components.push(component);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let mut class_attributes = Vec::new();
        for (name, items) in [
            ("RuntimeVisibleAnnotations", std::mem::take(&mut self.annotations)),
            (
                "RuntimeVisibleTypeAnnotations",
                std::mem::take(&mut self.visible_type_annotations),
            ),
            (
                "RuntimeInvisibleTypeAnnotations",
                std::mem::take(&mut self.invisible_type_annotations),
            ),
            ("Record", std::mem::take(&mut self.record_components)),
        ] {
            if items.is_empty() {
                continue;
            }
            if name == "Record" {
                self.major_version = RECORD_MAJOR_VERSION;
            }
            let name = self.utf8(name);
            let mut body = (items.len() as u16).to_be_bytes().to_vec();
            for item in items {
                body.extend_from_slice(&item);
            }
            class_attributes.push(attribute(name, &body));
        }

        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.major_version.to_be_bytes());

        out.extend_from_slice(&(self.pool.len() as u16 + 1).to_be_bytes());
        for entry in &self.pool {
            out.extend_from_slice(entry);
        }

        out.extend_from_slice(&(ACC_PUBLIC | ACC_SUPER | ACC_ABSTRACT).to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for interface in &self.interfaces {
            out.extend_from_slice(&interface.to_be_bytes());
        }
        for members in [&self.fields, &self.methods, &class_attributes] {
            out.extend_from_slice(&(members.len() as u16).to_be_bytes());
            for member in members {
                out.extend_from_slice(member);
            }
        }
        out
    }

    fn push(&mut self, tag: u8, payload: &[u8]) -> u16 {
        let mut entry = vec![tag];
        entry.extend_from_slice(payload);
        self.pool.push(entry);
        self.pool.len() as u16
    }

    fn push_pair(&mut self, tag: u8, a: u16, b: u16) -> u16 {
        let [a_hi, a_lo] = a.to_be_bytes();
        let [b_hi, b_lo] = b.to_be_bytes();
        self.push(tag, &[a_hi, a_lo, b_hi, b_lo])
    }

    fn utf8(&mut self, text: &str) -> u16 {
        if let Some(index) = self.utf8s.get(text) {
            return *index;
        }
        let mut payload = (text.len() as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(text.as_bytes());
        let index = self.push(TAG_UTF8, &payload);
        self.utf8s.insert(text.to_owned(), index);
        index
    }

    fn class(&mut self, internal_name: &str) -> u16 {
        if let Some(index) = self.classes.get(internal_name) {
            return *index;
        }
        let name = self.utf8(internal_name);
        let index = self.push(TAG_CLASS, &name.to_be_bytes());
        self.classes.insert(internal_name.to_owned(), index);
        index
    }

    fn member(&mut self, access: u16, name: &str, descriptor: &str, attributes: Vec<Vec<u8>>) -> Vec<u8> {
        self.member_body(Some(access), name, descriptor, attributes)
    }

    /// Fields, methods and record components share this layout, minus the
    /// access flags for the latter
    fn member_body(
        &mut self,
        access: Option<u16>,
        name: &str,
        descriptor: &str,
        attributes: Vec<Vec<u8>>,
    ) -> Vec<u8> {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut out = Vec::new();
        if let Some(access) = access {
            out.extend_from_slice(&access.to_be_bytes());
        }
        out.extend_from_slice(&name.to_be_bytes());
        out.extend_from_slice(&descriptor.to_be_bytes());
        out.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
        for attribute in attributes {
            out.extend_from_slice(&attribute);
        }
        out
    }

    fn code(&mut self, max_stack: u16, max_locals: u16, code: &[u8], attributes: &[Vec<u8>]) -> Vec<u8> {
        let code_name = self.utf8("Code");
        let mut body = Vec::new();
        body.extend_from_slice(&max_stack.to_be_bytes());
        body.extend_from_slice(&max_locals.to_be_bytes());
        body.extend_from_slice(&(code.len() as u32).to_be_bytes());
        body.extend_from_slice(code);
        body.extend_from_slice(&0u16.to_be_bytes()); // exception table
        body.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
        for attribute in attributes {
            body.extend_from_slice(attribute);
        }
        attribute(code_name, &body)
    }

    fn encode_annotation(&mut self, type_descriptor: &str, elements: &[(&str, AnnotationValue<'_>)]) -> Vec<u8> {
        let mut out = self.utf8(type_descriptor).to_be_bytes().to_vec();
        out.extend_from_slice(&(elements.len() as u16).to_be_bytes());
        for (name, value) in elements {
            out.extend_from_slice(&self.utf8(name).to_be_bytes());
            out.extend_from_slice(&self.encode_value(*value));
        }
        out
    }

    fn encode_value(&mut self, value: AnnotationValue<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        match value {
            AnnotationValue::Str(text) => {
                out.push(b's');
                out.extend_from_slice(&self.utf8(text).to_be_bytes());
            }
            AnnotationValue::Enum(type_descriptor, constant) => {
                out.push(b'e');
                out.extend_from_slice(&self.utf8(type_descriptor).to_be_bytes());
                out.extend_from_slice(&self.utf8(constant).to_be_bytes());
            }
            AnnotationValue::Class(descriptor) => {
                out.push(b'c');
                out.extend_from_slice(&self.utf8(descriptor).to_be_bytes());
            }
        }
        out
    }
}

fn attribute(name: u16, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 6);
    out.extend_from_slice(&name.to_be_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

enum JarItem {
    Directory(String),
    File {
        path: String,
        content: Vec<u8>,
        compression: CompressionMethod,
    },
}

/// Builder for in-memory jars. Entries are written in the order they are
/// added, with a fixed timestamp.
#[derive(Default)]
pub struct JarBuilder {
    items: Vec<JarItem>,
}

impl JarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directory(mut self, path: &str) -> Self {
        self.items.push(JarItem::Directory(path.to_owned()));
        self
    }

    /// Deflated entry
    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.items.push(JarItem::File {
            path: path.to_owned(),
            content: content.to_vec(),
            compression: CompressionMethod::Deflated,
        });
        self
    }

    /// Uncompressed entry, the way nested jars are usually stored
    pub fn stored_file(mut self, path: &str, content: &[u8]) -> Self {
        self.items.push(JarItem::File {
            path: path.to_owned(),
            content: content.to_vec(),
            compression: CompressionMethod::Stored,
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for item in self.items {
            match item {
                JarItem::Directory(path) => {
                    zip.add_directory(path, options(CompressionMethod::Stored))
                        .expect("add directory");
                }
                JarItem::File {
                    path,
                    content,
                    compression,
                } => {
                    zip.start_file(path, options(compression))
                        .expect("start file");
                    zip.write_all(&content).expect("write file");
                }
            }
        }
        zip.finish().expect("finish jar").into_inner()
    }
}

fn options(compression: CompressionMethod) -> FileOptions<'static, ()> {
    FileOptions::default()
        .compression_method(compression)
        .last_modified_time(DateTime::default())
}

/// Entry of a jar read back by [`read_jar`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarEntry {
    pub path: String,
    pub is_dir: bool,
    pub content: Vec<u8>,
    pub compression: CompressionMethod,
}

/// Reads every entry of `jar`, in storage order
pub fn read_jar(jar: &[u8]) -> Vec<JarEntry> {
    let mut zip = ZipArchive::new(Cursor::new(jar)).expect("valid jar");
    (0..zip.len())
        .map(|index| {
            let mut file = zip.by_index(index).expect("readable entry");
            let mut content = Vec::new();
            file.read_to_end(&mut content).expect("readable content");
            JarEntry {
                path: file.name().to_owned(),
                is_dir: file.is_dir(),
                content,
                compression: file.compression(),
            }
        })
        .collect()
}

/// Single entry of `jar` by path
pub fn jar_entry(jar: &[u8], path: &str) -> Option<JarEntry> {
    read_jar(jar).into_iter().find(|entry| entry.path == path)
}

/// Paths of every entry of `jar`, in storage order
pub fn jar_paths(jar: &[u8]) -> Vec<String> {
    read_jar(jar).into_iter().map(|entry| entry.path).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_constants() {
        let class = ClassFileBuilder::new("a/B").class_ref("a/B").field("b", "La/B;");
        assert_eq!(class.classes.len(), 2);
        assert_eq!(class.utf8s.get("a/B"), Some(&1));
    }

    #[test]
    fn records_bump_the_class_version() {
        let plain = ClassFileBuilder::new("a/B").build();
        let record = ClassFileBuilder::new("a/B")
            .record_component("c", "La/C;", None)
            .build();
        assert_eq!(&plain[6..8], &MAJOR_VERSION.to_be_bytes());
        assert_eq!(&record[6..8], &RECORD_MAJOR_VERSION.to_be_bytes());
    }

    #[test]
    fn annotation_strings_share_utf8_constants() {
        let class = ClassFileBuilder::new("a/B")
            .class_ref("a/C")
            .annotation_with("La/Marker;", "value", AnnotationValue::Str("a/C"));
        assert_eq!(class.utf8s.get("a/C"), Some(&5));
    }

    #[test]
    fn jar_round_trip_keeps_order() {
        let jar = JarBuilder::new()
            .directory("a/")
            .file("a/B.class", b"one")
            .stored_file("lib/x.jar", b"two")
            .build();
        let entries = read_jar(&jar);
        assert_eq!(jar_paths(&jar), ["a/", "a/B.class", "lib/x.jar"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[2].compression, CompressionMethod::Stored);
        assert_eq!(jar_entry(&jar, "a/B.class").unwrap().content, b"one");
    }
}
