use std::{collections::HashSet, fmt};

use crate::error::RelocateError;

const MARKER_PREFIX: &str = "jarshade relocated-under=";

/// Package path that relocated entries are moved under, kept in both the
/// slash form used by paths and bytecode and the dotted form used by service
/// declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationPrefix {
    slashed: String,
    dotted: String,
}

impl RelocationPrefix {
    /// Accepts `shaded/vendor/`, `shaded/vendor` or `shaded.vendor`
    pub fn parse(raw: &str) -> Result<Self, RelocateError> {
        let invalid = || RelocateError::InvalidPrefix(raw.to_owned());

        let normalized = raw.trim().replace('.', "/");
        let segments: Vec<&str> = normalized.trim_matches('/').split('/').collect();
        let valid_segment = |segment: &&str| {
            !segment.is_empty()
                && !segment
                    .chars()
                    .any(|c| c.is_whitespace() || matches!(c, ';' | '[' | '<' | '>' | ':' | '\\'))
        };
        if !segments.iter().all(valid_segment) {
            return Err(invalid());
        }

        Ok(Self {
            slashed: format!("{}/", segments.join("/")),
            dotted: format!("{}.", segments.join(".")),
        })
    }

    /// `shaded/vendor/`
    pub fn slashed(&self) -> &str {
        &self.slashed
    }

    /// `shaded.vendor.`
    pub fn dotted(&self) -> &str {
        &self.dotted
    }

    pub fn apply(&self, path: &str) -> String {
        format!("{}{}", self.slashed, path)
    }

    /// Archive comment stamped on every archive relocated under this prefix.
    /// An input carrying it has been through this relocation already.
    pub fn marker(&self) -> String {
        format!("{}{}", MARKER_PREFIX, self.slashed)
    }
}

impl fmt::Display for RelocationPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slashed)
    }
}

/// Prefix plus the `.class` entry paths belonging to the current relocation
/// unit. Extending produces a new context; the one it came from is untouched,
/// so a nested archive's classes never leak back to its parent.
#[derive(Debug, Clone)]
pub struct RelocationContext {
    prefix: RelocationPrefix,
    known: HashSet<String>,
}

impl RelocationContext {
    pub fn new(prefix: RelocationPrefix) -> Self {
        Self {
            prefix,
            known: HashSet::new(),
        }
    }

    pub fn prefix(&self) -> &RelocationPrefix {
        &self.prefix
    }

    pub fn extend<I>(&self, class_paths: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut known = self.known.clone();
        known.extend(class_paths);
        Self {
            prefix: self.prefix.clone(),
            known,
        }
    }

    pub fn known_classes(&self) -> usize {
        self.known.len()
    }

    pub fn knows(&self, internal_name: &str) -> bool {
        self.known.contains(&format!("{internal_name}.class"))
    }

    /// The naming function applied to every class reference: a class that is
    /// part of this relocation unit moves under the prefix, anything else
    /// (platform classes, unshaded libraries) is passed through.
    ///
    /// Only the known set decides, so a library whose packages already start
    /// with the prefix is still moved. Archives that went through the same
    /// relocation before are recognized by their [`RelocationPrefix::marker`].
    pub fn rename(&self, internal_name: &str) -> Option<String> {
        self.knows(internal_name)
            .then(|| self.prefix.apply(internal_name))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::jar::core::remap_descriptor;

    fn prefix(raw: &str) -> RelocationPrefix {
        RelocationPrefix::parse(raw).unwrap()
    }

    #[test]
    fn prefix_forms_are_normalized() {
        for raw in ["shaded/vendor/", "shaded/vendor", "shaded.vendor", " shaded.vendor. "] {
            let p = prefix(raw);
            assert_eq!(p.slashed(), "shaded/vendor/");
            assert_eq!(p.dotted(), "shaded.vendor.");
        }
    }

    #[test]
    fn bad_prefixes_are_rejected() {
        for raw in ["", "/", "a//b", "a b/", "a;b/", "[a/"] {
            assert!(
                matches!(RelocationPrefix::parse(raw), Err(RelocateError::InvalidPrefix(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn renames_only_known_classes() {
        let ctx = RelocationContext::new(prefix("shaded/")).extend(["a/C.class".to_owned()]);
        assert_eq!(ctx.rename("a/C"), Some("shaded/a/C".to_owned()));
        assert_eq!(ctx.rename("java/lang/String"), None);
        assert_eq!(ctx.rename("a/D"), None);
    }

    #[test]
    fn rename_is_a_fixed_point() {
        let ctx = RelocationContext::new(prefix("shaded/")).extend(["a/C.class".to_owned()]);
        let once = ctx.rename("a/C").unwrap();
        assert_eq!(ctx.rename(&once), None);
    }

    #[test]
    fn packages_under_the_prefix_are_still_moved() {
        let ctx = RelocationContext::new(prefix("com/acme/"))
            .extend(["com/acme/util/A.class".to_owned()]);
        assert_eq!(
            ctx.rename("com/acme/util/A").as_deref(),
            Some("com/acme/com/acme/util/A")
        );
    }

    #[test]
    fn marker_names_the_prefix() {
        assert_eq!(prefix("shaded.vendor").marker(), "jarshade relocated-under=shaded/vendor/");
    }

    fn class_name() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z][a-z0-9]{0,5}", 1..4).prop_map(|parts| parts.join("/"))
    }

    proptest! {
        #[test]
        fn renaming_descriptors_reaches_a_fixed_point(
            names in prop::collection::vec(class_name(), 1..5),
            dimensions in prop::collection::vec(0..3usize, 1..5),
            known in prop::collection::vec(any::<bool>(), 1..5),
        ) {
            // Upper case never collides with the generated package names
            let ctx = RelocationContext::new(prefix("Relocated/")).extend(
                names
                    .iter()
                    .zip(&known)
                    .filter(|(_, known)| **known)
                    .map(|(name, _)| format!("{name}.class")),
            );
            let rename = |name: &str| ctx.rename(name);
            let params: String = names
                .iter()
                .zip(dimensions.iter().cycle())
                .map(|(name, dims)| format!("{}L{name};", "[".repeat(*dims)))
                .collect();
            let desc = format!("({params})V");

            let once = remap_descriptor(&desc, &rename)
                .unwrap()
                .unwrap_or_else(|| desc.clone());
            let twice = remap_descriptor(&once, &rename).unwrap();
            prop_assert_eq!(twice, None);
        }
    }

    #[test]
    fn extending_does_not_touch_the_parent() {
        let parent = RelocationContext::new(prefix("shaded/")).extend(["a/B.class".to_owned()]);
        let child = parent.extend(["n/C.class".to_owned()]);
        assert!(child.knows("a/B"));
        assert!(child.knows("n/C"));
        assert!(!parent.knows("n/C"));
        assert_eq!(parent.known_classes(), 1);
        assert_eq!(child.known_classes(), 2);
    }
}
