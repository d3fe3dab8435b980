//! Drift classification between declared spec fields and observed forge values.
//!
//! Rules shared by every kind:
//! - an absent optional (or empty required scalar) means "user does not care";
//! - scalars compare exactly;
//! - collections compare as sets unless the caller uses [`Drift::ordered`].

use std::collections::BTreeSet;

use smallvec::SmallVec;

/// Accumulates the names of drifted fields.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Drift {
    fields: SmallVec<[&'static str; 4]>,
}

impl Drift {
    pub fn new() -> Self { Self::default() }

    pub fn mark(&mut self, field: &'static str) -> &mut Self {
        if !self.fields.contains(&field) {
            self.fields.push(field);
        }
        self
    }

    /// Required string field; an empty desired value is treated as undeclared.
    pub fn required(&mut self, field: &'static str, desired: &str, observed: &str) -> &mut Self {
        if !desired.is_empty() && desired != observed {
            self.mark(field);
        }
        self
    }

    pub fn optional<T: PartialEq>(&mut self, field: &'static str, desired: &Option<T>, observed: &T) -> &mut Self {
        if let Some(d) = desired {
            if d != observed {
                self.mark(field);
            }
        }
        self
    }

    /// Optional field compared with a domain-specific equality (e.g. case-insensitive colors).
    pub fn optional_by<T, U: ?Sized>(
        &mut self,
        field: &'static str,
        desired: Option<&T>,
        observed: &U,
        eq: impl Fn(&T, &U) -> bool,
    ) -> &mut Self {
        if let Some(d) = desired {
            if !eq(d, observed) {
                self.mark(field);
            }
        }
        self
    }

    pub fn unordered(&mut self, field: &'static str, desired: Option<&[String]>, observed: &[String]) -> &mut Self {
        if let Some(d) = desired {
            if !same_set(d, observed) {
                self.mark(field);
            }
        }
        self
    }

    pub fn ordered(&mut self, field: &'static str, desired: Option<&[String]>, observed: &[String]) -> &mut Self {
        if let Some(d) = desired {
            if d != observed {
                self.mark(field);
            }
        }
        self
    }

    pub fn is_clean(&self) -> bool { self.fields.is_empty() }
    pub fn contains(&self, field: &str) -> bool { self.fields.iter().any(|f| *f == field) }
    pub fn fields(&self) -> &[&'static str] { &self.fields }
}

/// Order-insensitive, duplicate-insensitive equality.
pub fn same_set(a: &[String], b: &[String]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(|s| s.as_str()).collect();
    let b: BTreeSet<&str> = b.iter().map(|s| s.as_str()).collect();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(xs: &[&str]) -> Vec<String> { xs.iter().map(|s| s.to_string()).collect() }

    #[test]
    fn absent_fields_never_drift() {
        let mut d = Drift::new();
        d.optional("body", &None::<String>, &"server".to_string())
            .optional("draft", &None::<bool>, &true)
            .unordered("events", None, &v(&["push"]))
            .required("name", "", "whatever");
        assert!(d.is_clean());
    }

    #[test]
    fn present_fields_compare_exactly() {
        let mut d = Drift::new();
        d.optional("body", &Some("new".to_string()), &"old".to_string())
            .optional("draft", &Some(false), &false)
            .required("tagName", "v1", "v1");
        assert_eq!(d.fields(), &["body"]);
        assert!(d.contains("body"));
        assert!(!d.contains("draft"));
    }

    #[test]
    fn collections_are_sets_unless_ordered() {
        let mut d = Drift::new();
        d.unordered("events", Some(&v(&["push", "issues"])), &v(&["issues", "push", "push"]));
        assert!(d.is_clean());
        d.ordered("branches", Some(&v(&["a", "b"])), &v(&["b", "a"]));
        assert_eq!(d.fields(), &["branches"]);
    }

    #[test]
    fn custom_equality_and_dedup() {
        let mut d = Drift::new();
        d.optional_by("color", Some(&"#FF0000".to_string()), "ff0000", |a, b| {
            a.trim_start_matches('#').eq_ignore_ascii_case(b.trim_start_matches('#'))
        });
        assert!(d.is_clean());
        d.mark("x").mark("x");
        assert_eq!(d.fields().len(), 1);
    }
}
