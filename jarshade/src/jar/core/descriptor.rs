//! Rewriting of class names inside field/method descriptors and generic
//! signatures (JVMS §4.3 and §4.7.9.1).
//!
//! Descriptors are a subset of the signature grammar, so both go through the
//! same recursive-descent walker. Everything except the internal name of a
//! class type is copied through verbatim.

use crate::jar::core::classfile::ClassFormatError;

/// Maps an internal class name (`a/b/C`) to its replacement, `None` keeps it
pub type Rename<'r> = &'r dyn Fn(&str) -> Option<String>;

/// Remaps a field or method descriptor. Returns `None` when nothing changed.
pub fn remap_descriptor(
    descriptor: &str,
    rename: Rename<'_>,
) -> Result<Option<String>, ClassFormatError> {
    // Annotation class values may name `void`
    if descriptor == "V" {
        return Ok(None);
    }
    let mut walker = Walker::new(descriptor, rename);
    if walker.peek() == Some(b'(') {
        walker.method_tail()?;
    } else {
        walker.java_type()?;
    }
    walker.finish()
}

/// Remaps a class, method or field signature. Returns `None` when nothing
/// changed.
pub fn remap_signature(
    signature: &str,
    rename: Rename<'_>,
) -> Result<Option<String>, ClassFormatError> {
    let mut walker = Walker::new(signature, rename);
    if walker.peek() == Some(b'<') {
        walker.type_parameters()?;
    }
    if walker.peek() == Some(b'(') {
        walker.method_tail()?;
    } else {
        // Field signature or superclass followed by superinterfaces
        walker.java_type()?;
        while walker.peek().is_some() {
            walker.java_type()?;
        }
    }
    walker.finish()
}

/// Remaps the operand of a `CONSTANT_Class`: either an internal name or, for
/// arrays, a field descriptor.
pub fn remap_class_operand(
    name: &str,
    rename: Rename<'_>,
) -> Result<Option<String>, ClassFormatError> {
    if name.starts_with('[') {
        remap_descriptor(name, rename)
    } else {
        Ok(rename(name))
    }
}

struct Walker<'s, 'r> {
    src: &'s str,
    pos: usize,
    out: String,
    changed: bool,
    rename: Rename<'r>,
}

impl<'s, 'r> Walker<'s, 'r> {
    fn new(src: &'s str, rename: Rename<'r>) -> Self {
        Self {
            src,
            pos: 0,
            out: String::with_capacity(src.len()),
            changed: false,
            rename,
        }
    }

    fn error(&self) -> ClassFormatError {
        ClassFormatError::BadDescriptor(self.src.to_owned())
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn copy_byte(&mut self) -> Result<u8, ClassFormatError> {
        let b = self.peek().ok_or_else(|| self.error())?;
        // Only ever called on ASCII grammar bytes
        self.out.push(b as char);
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, want: u8) -> Result<(), ClassFormatError> {
        if self.peek() != Some(want) {
            return Err(self.error());
        }
        self.copy_byte().map(|_| ())
    }

    /// Advances over an identifier ending before any of `stops`, returning it
    fn identifier(&mut self, stops: &[u8]) -> Result<&'s str, ClassFormatError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if stops.contains(&b) {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start || self.peek().is_none() {
            return Err(self.error());
        }
        Ok(&self.src[start..self.pos])
    }

    fn java_type(&mut self) -> Result<(), ClassFormatError> {
        match self.peek() {
            Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => {
                self.copy_byte().map(|_| ())
            }
            Some(b'L') => self.class_type(),
            Some(b'T') => self.type_variable(),
            Some(b'[') => {
                self.copy_byte()?;
                self.java_type()
            }
            _ => Err(self.error()),
        }
    }

    fn class_type(&mut self) -> Result<(), ClassFormatError> {
        self.expect(b'L')?;
        let name = self.identifier(b";<.")?;
        match (self.rename)(name) {
            Some(renamed) => {
                self.out.push_str(&renamed);
                self.changed = true;
            }
            None => self.out.push_str(name),
        }

        loop {
            match self.peek() {
                Some(b'<') => self.type_arguments()?,
                Some(b'.') => {
                    // Inner class suffix, a simple name that is never relocated
                    self.copy_byte()?;
                    let inner = self.identifier(b";<.")?;
                    self.out.push_str(inner);
                }
                Some(b';') => return self.expect(b';'),
                _ => return Err(self.error()),
            }
        }
    }

    fn type_arguments(&mut self) -> Result<(), ClassFormatError> {
        self.expect(b'<')?;
        loop {
            match self.peek() {
                Some(b'>') => return self.expect(b'>'),
                Some(b'*') => {
                    self.copy_byte()?;
                }
                Some(b'+' | b'-') => {
                    self.copy_byte()?;
                    self.java_type()?;
                }
                Some(_) => self.java_type()?,
                None => return Err(self.error()),
            }
        }
    }

    fn type_variable(&mut self) -> Result<(), ClassFormatError> {
        self.expect(b'T')?;
        let name = self.identifier(b";")?;
        self.out.push_str(name);
        self.expect(b';')
    }

    fn type_parameters(&mut self) -> Result<(), ClassFormatError> {
        self.expect(b'<')?;
        loop {
            if self.peek() == Some(b'>') {
                return self.expect(b'>');
            }
            let name = self.identifier(b":")?;
            self.out.push_str(name);
            // Class bound, possibly empty
            self.expect(b':')?;
            if matches!(self.peek(), Some(b'L' | b'T' | b'[')) {
                self.java_type()?;
            }
            // Interface bounds
            while self.peek() == Some(b':') {
                self.copy_byte()?;
                self.java_type()?;
            }
        }
    }

    fn method_tail(&mut self) -> Result<(), ClassFormatError> {
        self.expect(b'(')?;
        while self.peek() != Some(b')') {
            self.java_type()?;
        }
        self.expect(b')')?;

        if self.peek() == Some(b'V') {
            self.copy_byte()?;
        } else {
            self.java_type()?;
        }

        while self.peek() == Some(b'^') {
            self.copy_byte()?;
            self.java_type()?;
        }
        Ok(())
    }

    fn finish(self) -> Result<Option<String>, ClassFormatError> {
        if self.pos != self.src.len() {
            return Err(self.error());
        }
        Ok(self.changed.then_some(self.out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shade(name: &str) -> Option<String> {
        if name.starts_with("shaded/") || name.starts_with("java/") {
            None
        } else {
            Some(format!("shaded/{name}"))
        }
    }

    fn descriptor(desc: &str) -> String {
        remap_descriptor(desc, &shade)
            .unwrap()
            .unwrap_or_else(|| desc.to_owned())
    }

    fn signature(sig: &str) -> String {
        remap_signature(sig, &shade)
            .unwrap()
            .unwrap_or_else(|| sig.to_owned())
    }

    #[test]
    fn field_descriptors() {
        assert_eq!(descriptor("I"), "I");
        assert_eq!(descriptor("La/C;"), "Lshaded/a/C;");
        assert_eq!(descriptor("[[La/C;"), "[[Lshaded/a/C;");
        assert_eq!(descriptor("Ljava/lang/String;"), "Ljava/lang/String;");
    }

    #[test]
    fn method_descriptors() {
        assert_eq!(
            descriptor("(ILa/C;[Ljava/lang/String;)La/D;"),
            "(ILshaded/a/C;[Ljava/lang/String;)Lshaded/a/D;"
        );
        assert_eq!(descriptor("()V"), "()V");
    }

    #[test]
    fn unchanged_descriptor_is_none() {
        assert_eq!(
            remap_descriptor("(Ljava/lang/Object;)V", &shade).unwrap(),
            None
        );
    }

    #[test]
    fn generic_signatures() {
        assert_eq!(
            signature("Ljava/util/List<La/C;>;"),
            "Ljava/util/List<Lshaded/a/C;>;"
        );
        assert_eq!(
            signature("<T:Ljava/lang/Object;U::La/Api;>La/Base<TT;>;La/Api;"),
            "<T:Ljava/lang/Object;U::Lshaded/a/Api;>Lshaded/a/Base<TT;>;Lshaded/a/Api;"
        );
        assert_eq!(
            signature("<E:La/C;>(TE;Ljava/util/Map<+La/K;*>;)TE;^La/Oops;^TX;"),
            "<E:Lshaded/a/C;>(TE;Ljava/util/Map<+Lshaded/a/K;*>;)TE;^Lshaded/a/Oops;^TX;"
        );
    }

    #[test]
    fn inner_class_suffix_is_kept() {
        assert_eq!(
            signature("La/Outer<TT;>.Inner<La/C;>;"),
            "Lshaded/a/Outer<TT;>.Inner<Lshaded/a/C;>;"
        );
    }

    #[test]
    fn array_class_operand() {
        assert_eq!(
            remap_class_operand("[La/C;", &shade).unwrap(),
            Some("[Lshaded/a/C;".to_owned())
        );
        assert_eq!(
            remap_class_operand("a/C", &shade).unwrap(),
            Some("shaded/a/C".to_owned())
        );
    }

    #[test]
    fn malformed_inputs_fail() {
        for bad in ["", "La/C", "(I", "Q", "(I)", "La/C;x", "<T>V"] {
            assert!(
                remap_signature(bad, &shade).is_err(),
                "accepted {bad:?}"
            );
        }
        assert!(remap_descriptor("II", &shade).is_err());
    }
}
