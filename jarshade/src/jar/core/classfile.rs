use std::collections::{BTreeMap, BTreeSet};

use krakatau2::lib::{
    classfile::{
        self,
        attrs::{Annotation, AttrBody, Attribute, ElementValue},
        cpool::{BStr, Const},
        parse::Class,
    },
    ParserOptions,
};
use thiserror::Error;
use tracing::debug;

use crate::jar::core::{
    assembly::{reasm, ReasmError},
    descriptor::{remap_class_operand, remap_descriptor, remap_signature, Rename},
};

pub(crate) const PARSER_OPTIONS: ParserOptions = ParserOptions {
    no_short_code_attr: true,
};

#[derive(Debug, Error)]
pub enum ClassFormatError {
    #[error("Unparseable class file: {0}")]
    Parse(String),
    #[error("Constant #{0} is missing or not UTF-8")]
    BadConstIndex(u16),
    #[error("Malformed descriptor or signature: {0:?}")]
    BadDescriptor(String),
    #[error("Constant #{0} is used as symbols that rename differently")]
    ConflictingSymbol(u16),
    #[error("Constant pool overflow")]
    ConstPoolOverflow,
    #[error("Failed to re-emit class: {0}")]
    Reasm(#[from] ReasmError),
    #[error("Rejected by class parser: {0}")]
    Rejected(String),
}

#[derive(Debug)]
pub struct RemappedClass {
    pub bytes: Vec<u8>,
    /// Number of UTF-8 constants whose text changed
    pub renamed_symbols: usize,
}

pub fn parse_class(data: &[u8]) -> Result<Class<'_>, ClassFormatError> {
    classfile::parse(data, PARSER_OPTIONS).map_err(|err| ClassFormatError::Parse(format!("{:?}", err)))
}

/// Internal name of the class itself
pub fn class_name(class: &Class<'_>) -> Option<String> {
    class
        .cp
        .clsutf(class.this)
        .map(|name| String::from_utf8_lossy(name).into_owned())
}

/// Renames every class reference in `data` through `rename`.
///
/// A class without anything to rename comes back byte for byte.
pub fn remap_class(data: &[u8], rename: Rename<'_>) -> Result<RemappedClass, ClassFormatError> {
    let plan = RenamePlan::build(&parse_class(data)?, rename)?;
    if plan.renamed.is_empty() {
        return Ok(RemappedClass {
            bytes: data.to_vec(),
            renamed_symbols: 0,
        });
    }

    // Borrows the new texts from `plan`
    let mut class = parse_class(data)?;
    plan.apply(&mut class)?;
    let bytes = reasm(&class)?;

    Ok(RemappedClass {
        bytes,
        renamed_symbols: plan.renamed.len(),
    })
}

/// How a UTF-8 constant is interpreted by the JVM
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SymbolRole {
    /// Operand of `CONSTANT_Class`
    ClassOperand,
    Descriptor,
    Signature,
}

/// UTF-8 constants of one class, by the roles they are read in
#[derive(Debug, Default)]
struct SymbolTable {
    symbols: BTreeMap<u16, BTreeSet<SymbolRole>>,
    /// Read as plain text: `CONSTANT_String` operands and annotation strings
    literals: BTreeSet<u16>,
}

impl SymbolTable {
    fn scan(class: &Class<'_>) -> Self {
        let mut table = Self::default();
        for entry in &class.cp.0 {
            match entry {
                Const::Class(name) => table.mark(*name, SymbolRole::ClassOperand),
                Const::NameAndType(_, descriptor) | Const::MethodType(descriptor) => {
                    table.mark(*descriptor, SymbolRole::Descriptor)
                }
                Const::Str(text) => {
                    table.literals.insert(*text);
                }
                _ => {}
            }
        }
        for member in class.fields.iter().chain(&class.methods) {
            table.mark(member.desc, SymbolRole::Descriptor);
            table.attributes(&member.attrs);
        }
        table.attributes(&class.attrs);
        table
    }

    fn mark(&mut self, index: u16, role: SymbolRole) {
        self.symbols.entry(index).or_default().insert(role);
    }

    fn attributes(&mut self, attrs: &[Attribute<'_>]) {
        for attr in attrs {
            match &attr.body {
                AttrBody::Code((_, nested)) => self.attributes(nested),
                AttrBody::Signature(signature) => self.mark(*signature, SymbolRole::Signature),
                AttrBody::LocalVariableTable(locals) => {
                    for local in locals {
                        self.mark(local.desc, SymbolRole::Descriptor);
                    }
                }
                AttrBody::LocalVariableTypeTable(locals) => {
                    for local in locals {
                        self.mark(local.desc, SymbolRole::Signature);
                    }
                }
                AttrBody::RuntimeVisibleAnnotations(annotations)
                | AttrBody::RuntimeInvisibleAnnotations(annotations) => {
                    for annotation in annotations {
                        self.annotation(annotation);
                    }
                }
                AttrBody::RuntimeVisibleParameterAnnotations(parameters)
                | AttrBody::RuntimeInvisibleParameterAnnotations(parameters) => {
                    for annotation in parameters.iter().flatten() {
                        self.annotation(annotation);
                    }
                }
                AttrBody::RuntimeVisibleTypeAnnotations(annotations)
                | AttrBody::RuntimeInvisibleTypeAnnotations(annotations) => {
                    for annotation in annotations {
                        self.annotation(&annotation.anno);
                    }
                }
                AttrBody::AnnotationDefault(value) => self.element_value(value),
                AttrBody::Record(components) => {
                    for component in components {
                        self.mark(component.desc, SymbolRole::Descriptor);
                        self.attributes(&component.attrs);
                    }
                }
                // Everything else points at CONSTANT_Class or other structured
                // constants, covered by the pool scan
                _ => {}
            }
        }
    }

    fn annotation(&mut self, annotation: &Annotation) {
        let Annotation(type_descriptor, elements) = annotation;
        self.mark(*type_descriptor, SymbolRole::Descriptor);
        for (_, value) in elements {
            self.element_value(value);
        }
    }

    fn element_value(&mut self, value: &ElementValue) {
        match value {
            ElementValue::Str(text) => {
                self.literals.insert(*text);
            }
            ElementValue::Enum(type_descriptor, _) => {
                self.mark(*type_descriptor, SymbolRole::Descriptor)
            }
            // Return descriptor, `V` included
            ElementValue::Class(descriptor) => self.mark(*descriptor, SymbolRole::Descriptor),
            ElementValue::Anno(nested) => self.annotation(nested),
            ElementValue::Array(values) => {
                for value in values {
                    self.element_value(value);
                }
            }
            _ => {}
        }
    }
}

/// Constant pool edits for one class, computed before the class is touched
#[derive(Debug, Default)]
struct RenamePlan {
    /// New text per symbolic UTF-8 constant
    renamed: Vec<(u16, String)>,
    /// Original text of renamed constants that a literal also reads
    split: Vec<(u16, Vec<u8>)>,
}

impl RenamePlan {
    fn build(class: &Class<'_>, rename: Rename<'_>) -> Result<Self, ClassFormatError> {
        let table = SymbolTable::scan(class);
        let mut plan = Self::default();

        for (&index, roles) in &table.symbols {
            let bytes = class
                .cp
                .utf8(index)
                .ok_or(ClassFormatError::BadConstIndex(index))?;
            let Ok(text) = std::str::from_utf8(bytes) else {
                // Modified UTF-8 outside the UTF-8 overlap, never a name we know
                debug!("skipping non UTF-8 constant #{}", index);
                continue;
            };

            let mut candidates = roles
                .iter()
                .map(|role| {
                    let mapped = match role {
                        SymbolRole::ClassOperand => remap_class_operand(text, rename)?,
                        SymbolRole::Descriptor => remap_descriptor(text, rename)?,
                        SymbolRole::Signature => remap_signature(text, rename)?,
                    };
                    Ok(mapped.unwrap_or_else(|| text.to_owned()))
                })
                .collect::<Result<Vec<String>, ClassFormatError>>()?;
            candidates.dedup();
            let [mapped] = candidates.as_slice() else {
                return Err(ClassFormatError::ConflictingSymbol(index));
            };

            if mapped != text {
                if table.literals.contains(&index) {
                    plan.split.push((index, bytes.to_vec()));
                }
                plan.renamed.push((index, mapped.clone()));
            }
        }

        Ok(plan)
    }

    /// Literals sharing a renamed constant are pointed at an appended copy
    /// of the original text first.
    fn apply<'a>(&'a self, class: &mut Class<'a>) -> Result<(), ClassFormatError> {
        for (index, original) in &self.split {
            let copy = u16::try_from(class.cp.0.len())
                .ok()
                .filter(|copy| *copy < u16::MAX)
                .ok_or(ClassFormatError::ConstPoolOverflow)?;
            class.cp.0.push(Const::Utf8(BStr(original.as_slice())));
            redirect_literal(class, *index, copy);
        }

        for (index, text) in &self.renamed {
            let slot = class
                .cp
                .0
                .get_mut(*index as usize)
                .ok_or(ClassFormatError::BadConstIndex(*index))?;
            *slot = Const::Utf8(BStr(text.as_bytes()));
        }
        Ok(())
    }
}

fn redirect_literal(class: &mut Class<'_>, from: u16, to: u16) {
    for entry in &mut class.cp.0 {
        if let Const::Str(target) = entry {
            if *target == from {
                *target = to;
            }
        }
    }
    for member in class.fields.iter_mut().chain(class.methods.iter_mut()) {
        redirect_in_attributes(&mut member.attrs, from, to);
    }
    redirect_in_attributes(&mut class.attrs, from, to);
}

fn redirect_in_attributes(attrs: &mut [Attribute<'_>], from: u16, to: u16) {
    for attr in attrs {
        match &mut attr.body {
            AttrBody::Code((_, nested)) => redirect_in_attributes(nested, from, to),
            AttrBody::RuntimeVisibleAnnotations(annotations)
            | AttrBody::RuntimeInvisibleAnnotations(annotations) => {
                for annotation in annotations {
                    redirect_in_annotation(annotation, from, to);
                }
            }
            AttrBody::RuntimeVisibleParameterAnnotations(parameters)
            | AttrBody::RuntimeInvisibleParameterAnnotations(parameters) => {
                for annotation in parameters.iter_mut().flatten() {
                    redirect_in_annotation(annotation, from, to);
                }
            }
            AttrBody::RuntimeVisibleTypeAnnotations(annotations)
            | AttrBody::RuntimeInvisibleTypeAnnotations(annotations) => {
                for annotation in annotations {
                    redirect_in_annotation(&mut annotation.anno, from, to);
                }
            }
            AttrBody::AnnotationDefault(value) => redirect_in_value(value, from, to),
            AttrBody::Record(components) => {
                for component in components {
                    redirect_in_attributes(&mut component.attrs, from, to);
                }
            }
            _ => {}
        }
    }
}

fn redirect_in_annotation(annotation: &mut Annotation, from: u16, to: u16) {
    for (_, value) in &mut annotation.1 {
        redirect_in_value(value, from, to);
    }
}

fn redirect_in_value(value: &mut ElementValue, from: u16, to: u16) {
    match value {
        ElementValue::Str(text) if *text == from => *text = to,
        ElementValue::Anno(nested) => redirect_in_annotation(nested, from, to),
        ElementValue::Array(values) => {
            for value in values {
                redirect_in_value(value, from, to);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarshade_test_utils::{AnnotationValue, ClassFileBuilder};

    fn shade_known(name: &str) -> Option<String> {
        matches!(name, "a/B" | "a/C" | "a/Api" | "a/Kind" | "a/Marker")
            .then(|| format!("shaded/{name}"))
    }

    fn utf8_texts(class: &Class<'_>) -> Vec<String> {
        class
            .cp
            .0
            .iter()
            .filter_map(|entry| match entry {
                Const::Utf8(text) => Some(String::from_utf8_lossy(text.0).into_owned()),
                _ => None,
            })
            .collect()
    }

    fn remapped_texts(data: &[u8]) -> Vec<String> {
        let remapped = remap_class(data, &shade_known).unwrap();
        assert!(remapped.renamed_symbols > 0);
        utf8_texts(&parse_class(&remapped.bytes).unwrap())
    }

    fn roles_of(data: &[u8], text: &str) -> BTreeSet<SymbolRole> {
        let class = parse_class(data).unwrap();
        let table = SymbolTable::scan(&class);
        table
            .symbols
            .iter()
            .filter(|(index, _)| class.cp.utf8(**index) == Some(text.as_bytes()))
            .flat_map(|(_, roles)| roles.iter().copied())
            .collect()
    }

    fn literal_texts(data: &[u8]) -> Vec<String> {
        let class = parse_class(data).unwrap();
        SymbolTable::scan(&class)
            .literals
            .iter()
            .map(|index| String::from_utf8_lossy(class.cp.utf8(*index).unwrap()).into_owned())
            .collect()
    }

    #[test]
    fn renames_own_name_and_known_references() {
        let data = ClassFileBuilder::new("a/B")
            .interface("a/Api")
            .field("c", "La/C;")
            .abstract_method("run", "(La/C;Ljava/lang/String;)La/C;")
            .build();

        let remapped = remap_class(&data, &shade_known).unwrap();
        let class = parse_class(&remapped.bytes).unwrap();
        assert_eq!(class_name(&class).as_deref(), Some("shaded/a/B"));
        let texts = utf8_texts(&class);
        assert!(texts.contains(&"shaded/a/Api".to_owned()));
        assert!(texts.contains(&"Lshaded/a/C;".to_owned()));
        assert!(texts.contains(&"(Lshaded/a/C;Ljava/lang/String;)Lshaded/a/C;".to_owned()));
        assert!(texts.contains(&"java/lang/Object".to_owned()));
        assert!(!texts.contains(&"a/B".to_owned()));
    }

    #[test]
    fn untouched_class_is_returned_verbatim() {
        let data = ClassFileBuilder::new("x/Y")
            .field("s", "Ljava/lang/String;")
            .build();
        let remapped = remap_class(&data, &shade_known).unwrap();
        assert_eq!(remapped.renamed_symbols, 0);
        assert_eq!(remapped.bytes, data);
    }

    #[test]
    fn string_literal_sharing_a_class_name_keeps_its_text() {
        let data = ClassFileBuilder::new("a/B")
            .class_ref("a/C")
            .string_method("target", "a/C")
            .build();
        let before = parse_class(&data).unwrap().cp.0.len();

        let remapped = remap_class(&data, &shade_known).unwrap();
        let class = parse_class(&remapped.bytes).unwrap();
        assert_eq!(class.cp.0.len(), before + 1);

        let literal = class
            .cp
            .0
            .iter()
            .find_map(|entry| match entry {
                Const::Str(index) => class.cp.utf8(*index),
                _ => None,
            })
            .unwrap();
        assert_eq!(literal, b"a/C");
        assert!(utf8_texts(&class).contains(&"shaded/a/C".to_owned()));
    }

    #[test]
    fn annotation_string_sharing_a_class_name_keeps_its_text() {
        let data = ClassFileBuilder::new("a/B")
            .class_ref("a/C")
            .annotation_with("La/Marker;", "value", AnnotationValue::Str("a/C"))
            .build();
        assert_eq!(literal_texts(&data), ["a/C"]);

        let remapped = remap_class(&data, &shade_known).unwrap();
        assert_eq!(literal_texts(&remapped.bytes), ["a/C"]);
        let texts = utf8_texts(&parse_class(&remapped.bytes).unwrap());
        assert!(texts.contains(&"shaded/a/C".to_owned()));
        assert!(texts.contains(&"Lshaded/a/Marker;".to_owned()));
    }

    #[test]
    fn signatures_and_annotations_are_renamed() {
        let data = ClassFileBuilder::new("a/B")
            .field_with_signature("items", "Ljava/util/List;", "Ljava/util/List<La/C;>;")
            .annotation("La/Marker;")
            .build();
        assert_eq!(
            roles_of(&data, "Ljava/util/List<La/C;>;"),
            BTreeSet::from([SymbolRole::Signature])
        );

        let texts = remapped_texts(&data);
        assert!(texts.contains(&"Ljava/util/List<Lshaded/a/C;>;".to_owned()));
        assert!(texts.contains(&"Lshaded/a/Marker;".to_owned()));
        assert!(texts.contains(&"Ljava/util/List;".to_owned()));
    }

    #[test]
    fn annotation_enum_and_class_values_are_renamed() {
        let data = ClassFileBuilder::new("a/B")
            .annotation_with("La/Marker;", "kind", AnnotationValue::Enum("La/Kind;", "FIRST"))
            .annotation_with("La/Api;", "type", AnnotationValue::Class("La/C;"))
            .annotation_with("Lx/Other;", "none", AnnotationValue::Class("V"))
            .build();
        assert_eq!(
            roles_of(&data, "La/Kind;"),
            BTreeSet::from([SymbolRole::Descriptor])
        );

        let texts = remapped_texts(&data);
        assert!(texts.contains(&"Lshaded/a/Kind;".to_owned()));
        assert!(texts.contains(&"FIRST".to_owned()));
        assert!(texts.contains(&"Lshaded/a/C;".to_owned()));
        assert!(texts.contains(&"V".to_owned()));
        assert!(texts.contains(&"Lx/Other;".to_owned()));
    }

    #[test]
    fn type_annotations_are_renamed() {
        let data = ClassFileBuilder::new("a/B")
            .type_annotation("La/Marker;", true)
            .type_annotation("La/Api;", false)
            .build();
        assert_eq!(
            roles_of(&data, "La/Api;"),
            BTreeSet::from([SymbolRole::Descriptor])
        );

        let texts = remapped_texts(&data);
        assert!(texts.contains(&"Lshaded/a/Marker;".to_owned()));
        assert!(texts.contains(&"Lshaded/a/Api;".to_owned()));
    }

    #[test]
    fn parameter_annotations_are_renamed() {
        let data = ClassFileBuilder::new("a/B")
            .parameter_annotation("run", "(Ljava/lang/String;)V", "La/Marker;", true)
            .parameter_annotation("stop", "(Ljava/lang/String;)V", "La/Api;", false)
            .build();

        let texts = remapped_texts(&data);
        assert!(texts.contains(&"Lshaded/a/Marker;".to_owned()));
        assert!(texts.contains(&"Lshaded/a/Api;".to_owned()));
        assert!(texts.contains(&"(Ljava/lang/String;)V".to_owned()));
    }

    #[test]
    fn annotation_defaults_are_renamed() {
        let data = ClassFileBuilder::new("a/Marker")
            .interface("java/lang/annotation/Annotation")
            .annotation_element("type", "Ljava/lang/Class;", AnnotationValue::Class("La/C;"))
            .annotation_element("kind", "La/Kind;", AnnotationValue::Enum("La/Kind;", "FIRST"))
            .build();

        let texts = remapped_texts(&data);
        assert!(texts.contains(&"Lshaded/a/C;".to_owned()));
        assert!(texts.contains(&"()Lshaded/a/Kind;".to_owned()));
        assert!(texts.contains(&"Lshaded/a/Kind;".to_owned()));
    }

    #[test]
    fn record_components_are_renamed() {
        let data = ClassFileBuilder::new("a/B")
            .super_class("java/lang/Record")
            .record_component("c", "La/C;", None)
            .record_component("items", "Ljava/util/List;", Some("Ljava/util/List<La/Api;>;"))
            .build();
        assert_eq!(
            roles_of(&data, "La/C;"),
            BTreeSet::from([SymbolRole::Descriptor])
        );
        assert_eq!(
            roles_of(&data, "Ljava/util/List<La/Api;>;"),
            BTreeSet::from([SymbolRole::Signature])
        );

        let texts = remapped_texts(&data);
        assert!(texts.contains(&"Lshaded/a/C;".to_owned()));
        assert!(texts.contains(&"Ljava/util/List<Lshaded/a/Api;>;".to_owned()));
    }

    #[test]
    fn local_variable_tables_are_renamed() {
        let data = ClassFileBuilder::new("a/B")
            .generic_local("fill", "items", "Ljava/util/List;", "Ljava/util/List<La/C;>;")
            .string_method("name", "hello")
            .build();
        assert_eq!(
            roles_of(&data, "Ljava/util/List<La/C;>;"),
            BTreeSet::from([SymbolRole::Signature])
        );
        assert_eq!(
            roles_of(&data, "La/B;"),
            BTreeSet::from([SymbolRole::Descriptor])
        );

        let texts = remapped_texts(&data);
        assert!(texts.contains(&"Ljava/util/List<Lshaded/a/C;>;".to_owned()));
        assert!(texts.contains(&"Lshaded/a/B;".to_owned()));
        assert!(texts.contains(&"hello".to_owned()));
    }

    #[test]
    fn method_type_constants_are_renamed() {
        let data = ClassFileBuilder::new("x/Y")
            .method_type("(La/C;)La/Api;")
            .build();
        assert_eq!(
            roles_of(&data, "(La/C;)La/Api;"),
            BTreeSet::from([SymbolRole::Descriptor])
        );

        let texts = remapped_texts(&data);
        assert!(texts.contains(&"(Lshaded/a/C;)Lshaded/a/Api;".to_owned()));
    }

    #[test]
    fn member_references_keep_names_and_rename_descriptors() {
        let data = ClassFileBuilder::new("a/B")
            .method_ref("a/C", "helper", "(La/C;)V")
            .build();
        let texts = remapped_texts(&data);
        assert!(texts.contains(&"helper".to_owned()));
        assert!(texts.contains(&"(Lshaded/a/C;)V".to_owned()));
    }

    #[test]
    fn conflicting_roles_are_rejected() {
        // `LC;` read both as an internal name and as a descriptor
        let data = ClassFileBuilder::new("x/Y")
            .class_ref("LC;")
            .field("c", "LC;")
            .build();
        let rename = |name: &str| (name == "C").then(|| "shaded/C".to_owned());
        assert!(matches!(
            remap_class(&data, &rename),
            Err(ClassFormatError::ConflictingSymbol(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_class(b"not a class"),
            Err(ClassFormatError::Parse(_))
        ));

        let mut data = ClassFileBuilder::new("a/B").build();
        data.truncate(data.len() - 1);
        assert!(remap_class(&data, &shade_known).is_err());
    }

    #[test]
    fn remapping_twice_is_stable() {
        let data = ClassFileBuilder::new("a/B").field("c", "La/C;").build();
        let once = remap_class(&data, &shade_known).unwrap();
        let twice = remap_class(&once.bytes, &shade_known).unwrap();
        assert_eq!(twice.renamed_symbols, 0);
        assert_eq!(twice.bytes, once.bytes);
    }
}
