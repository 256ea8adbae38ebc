use std::fmt;

use tracing::warn;

/// Which invariant an integrity finding concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntegrityCheck {
    UniqueIndex,
    SetIndex,
    ForeignKey,
    Link,
    /// A link collection without a mirrored declaration on the other store.
    LinkConfig,
}

impl fmt::Display for IntegrityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UniqueIndex => "unique-index",
            Self::SetIndex => "set-index",
            Self::ForeignKey => "foreign-key",
            Self::Link => "link",
            Self::LinkConfig => "link-config",
        };
        write!(f, "{s}")
    }
}

/// One finding from an integrity pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrityReport {
    pub entity_type: String,
    pub check: IntegrityCheck,
    /// Symbol or collection the finding concerns.
    pub field: String,
    /// Row the finding concerns; empty for configuration findings.
    pub id: String,
    pub detail: String,
    /// Whether the violation was repaired in place.
    pub fixed: bool,
}

/// Receives integrity findings.
pub trait IntegritySink {
    fn report(&mut self, report: IntegrityReport);
}

impl<F: FnMut(IntegrityReport)> IntegritySink for F {
    fn report(&mut self, report: IntegrityReport) {
        self(report)
    }
}

/// Builds reports for one store/field pair and logs each one.
pub(crate) struct Reporter<'a> {
    pub(crate) entity_type: &'a str,
    pub(crate) check: IntegrityCheck,
    pub(crate) field: &'a str,
    pub(crate) fix: bool,
}

impl Reporter<'_> {
    /// Emit a finding. `fixable` says whether a fix run repairs it.
    pub(crate) fn emit(&self, sink: &mut dyn IntegritySink, id: &str, detail: String, fixable: bool) {
        let fixed = self.fix && fixable;
        warn!(
            entity_type = self.entity_type,
            check = %self.check,
            field = self.field,
            id,
            fixed,
            "{detail}"
        );
        sink.report(IntegrityReport {
            entity_type: self.entity_type.to_string(),
            check: self.check,
            field: self.field.to_string(),
            id: id.to_string(),
            detail,
            fixed,
        });
    }
}
