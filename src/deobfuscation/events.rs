//! Structured event logging for deobfuscation runs.
//!
//! Every pass reports what it changed, and every per-method fault it tolerated, as an
//! [`Event`] in a shared [`EventLog`]. Statistics are derived from the recorded events by
//! [`DerivedStats::from_log`]; no counters are maintained on the side.
//!
//! The log is append-only and can be written through `&EventLog` from several threads at
//! once, so passes running on rayon workers record directly into it.
//!
//! # Example
//!
//! ```rust
//! use jarscope::deobfuscation::{DerivedStats, EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::TryCatchRemoved)
//!     .class("client")
//!     .method("a(I)V")
//!     .pass("TryCatchBlockRemover");
//! log.warn("Analysis of client.b()V failed: stack underflow");
//!
//! let stats = DerivedStats::from_log(&log);
//! assert_eq!(stats.try_catch_removed, 1);
//! assert_eq!(stats.warnings, 1);
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

/// Categories of recorded events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An unreachable instruction was removed.
    InstructionRemoved,
    /// An opaque predicate guard was replaced by an unconditional jump.
    OpaquePredicateRemoved,
    /// A decoy try/catch entry was removed.
    TryCatchRemoved,
    /// A synthetic method was removed.
    MethodRemoved,
    /// An unused field was removed.
    FieldRemoved,
    /// A field multiplier was cancelled at an access site.
    MultiplierCancelled,
    /// A chain of constant multiplications was folded.
    ConstantFolded,
    /// A method body was re-laid out in control-flow order.
    ControlFlowRestructured,
    /// A class received a placeholder name.
    ClassRenamed,
    /// A method received a placeholder name.
    MethodRenamed,
    /// A field received a placeholder name.
    FieldRenamed,
    /// A jump to the immediately following label was removed.
    GotoRemoved,
    /// A field instruction's owner was rewritten to the declaring class.
    FieldOwnerResolved,
    /// The members of a class were reordered.
    MembersSorted,

    /// Informational message.
    Info,
    /// Something unexpected but recoverable, such as an analysis fault in one method.
    Warning,
    /// Something failed.
    Error,
}

impl EventKind {
    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::InstructionRemoved => "instruction removed",
            Self::OpaquePredicateRemoved => "opaque predicate removed",
            Self::TryCatchRemoved => "try-catch block removed",
            Self::MethodRemoved => "method removed",
            Self::FieldRemoved => "field removed",
            Self::MultiplierCancelled => "multiplier cancelled",
            Self::ConstantFolded => "constant folded",
            Self::ControlFlowRestructured => "control flow restructured",
            Self::ClassRenamed => "class renamed",
            Self::MethodRenamed => "method renamed",
            Self::FieldRenamed => "field renamed",
            Self::GotoRemoved => "goto removed",
            Self::FieldOwnerResolved => "field owner resolved",
            Self::MembersSorted => "members sorted",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns `true` if the event represents a change to the classes.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        !self.is_diagnostic()
    }

    /// Returns `true` for info, warning and error events.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single recorded event.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Internal name of the class involved.
    pub class: Option<String>,
    /// `name + descriptor` of the method involved.
    pub method: Option<String>,
    /// List position within the method.
    pub location: Option<usize>,
    /// Human-readable detail.
    pub message: String,
    /// Name of the pass that recorded the event.
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            class: None,
            method: None,
            location: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.kind)?;
        match (&self.class, &self.method) {
            (Some(class), Some(method)) => write!(f, "{class}.{method}: ")?,
            (Some(class), None) => write!(f, "{class}: ")?,
            _ => {}
        }
        f.write_str(&self.message)
    }
}

/// Fluent builder returned by [`EventLog::record`]. The event is added when the builder is
/// dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    event: Option<Event>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            event: Some(Event::new(kind, String::new())),
        }
    }

    fn with(mut self, f: impl FnOnce(&mut Event)) -> Self {
        if let Some(event) = self.event.as_mut() {
            f(event);
        }
        self
    }

    /// Sets the class.
    pub fn class(self, class: impl Into<String>) -> Self {
        let class = class.into();
        self.with(|e| e.class = Some(class))
    }

    /// Sets the method (`name + descriptor`).
    pub fn method(self, method: impl Into<String>) -> Self {
        let method = method.into();
        self.with(|e| e.method = Some(method))
    }

    /// Sets the list position within the method.
    pub fn location(self, location: usize) -> Self {
        self.with(|e| e.location = Some(location))
    }

    /// Sets the message. Defaults to the kind's description.
    pub fn message(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.with(|e| e.message = message)
    }

    /// Associates the event with a pass.
    pub fn pass(self, pass: impl Into<String>) -> Self {
        let pass = pass.into();
        self.with(|e| e.pass = Some(pass))
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        if let Some(mut event) = self.event.take() {
            if event.message.is_empty() {
                event.message = event.kind.description().to_string();
            }
            self.log.events.push(event);
        }
    }
}

/// Append-only, thread-safe collection of events.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        self.iter().cloned().collect()
    }
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts an event of the given kind; it is recorded when the builder drops.
    ///
    /// ```rust,ignore
    /// log.record(EventKind::GotoRemoved).class(&class.name).method(&method.name);
    /// ```
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends copies of all events of `other`.
    pub fn merge(&self, other: &EventLog) {
        for event in other {
            self.events.push(event.clone());
        }
    }

    /// Returns `true` if an event of this kind was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.iter().any(|e| e.kind == kind)
    }

    /// Number of events of this kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.filter_kind(kind).count()
    }

    /// All events, in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Events of one kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Events recorded by one pass.
    pub fn filter_pass<'a>(&'a self, pass: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.iter().filter(move |e| e.pass.as_deref() == Some(pass))
    }

    /// Transformation events only.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_transformation())
    }

    /// Warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Error events.
    pub fn errors(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Error)
    }

    /// Event counts grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for event in self {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Number of distinct methods with at least one transformation.
    #[must_use]
    pub fn methods_affected(&self) -> usize {
        self.transformations()
            .filter_map(|e| Some((e.class.as_deref()?, e.method.as_deref()?)))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Human-readable one-line summary of the transformations.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(kind, _)| kind.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();
        if parts.is_empty() {
            return format!("{} events", self.len());
        }
        parts.sort();
        parts.join(", ")
    }
}

/// Iterator over `&Event`.
pub struct EventLogIter<'a> {
    inner: boxcar::Iter<'a, Event>,
}

impl<'a> Iterator for EventLogIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, e)| e)
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = EventLogIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        EventLogIter {
            inner: self.events.iter(),
        }
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let log = Self::new();
        for event in iter {
            log.events.push(event);
        }
        log
    }
}

/// Statistics computed from an [`EventLog`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedStats {
    /// Distinct methods with at least one transformation.
    pub methods_transformed: usize,
    /// Unreachable instructions removed.
    pub instructions_removed: usize,
    /// Opaque predicate guards removed.
    pub opaque_predicates_removed: usize,
    /// Decoy try/catch entries removed.
    pub try_catch_removed: usize,
    /// Methods removed.
    pub methods_removed: usize,
    /// Fields removed.
    pub fields_removed: usize,
    /// Field access sites where a multiplier was cancelled.
    pub multipliers_cancelled: usize,
    /// Multiplication chains folded.
    pub constants_folded: usize,
    /// Method bodies re-laid out.
    pub methods_straightened: usize,
    /// Redundant jumps removed.
    pub gotos_removed: usize,
    /// Field owners rewritten.
    pub field_owners_resolved: usize,
    /// Classes whose members were reordered.
    pub classes_sorted: usize,
    /// Classes renamed.
    pub classes_renamed: usize,
    /// Methods renamed.
    pub methods_renamed: usize,
    /// Fields renamed.
    pub fields_renamed: usize,
    /// Warnings recorded.
    pub warnings: usize,
    /// Errors recorded.
    pub errors: usize,
    /// Wall-clock time of the run.
    pub total_time: Duration,
}

impl DerivedStats {
    /// Computes statistics from `log`.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            methods_transformed: log.methods_affected(),
            instructions_removed: get(EventKind::InstructionRemoved),
            opaque_predicates_removed: get(EventKind::OpaquePredicateRemoved),
            try_catch_removed: get(EventKind::TryCatchRemoved),
            methods_removed: get(EventKind::MethodRemoved),
            fields_removed: get(EventKind::FieldRemoved),
            multipliers_cancelled: get(EventKind::MultiplierCancelled),
            constants_folded: get(EventKind::ConstantFolded),
            methods_straightened: get(EventKind::ControlFlowRestructured),
            gotos_removed: get(EventKind::GotoRemoved),
            field_owners_resolved: get(EventKind::FieldOwnerResolved),
            classes_sorted: get(EventKind::MembersSorted),
            classes_renamed: get(EventKind::ClassRenamed),
            methods_renamed: get(EventKind::MethodRenamed),
            fields_renamed: get(EventKind::FieldRenamed),
            warnings: get(EventKind::Warning),
            errors: get(EventKind::Error),
            total_time: Duration::ZERO,
        }
    }

    /// Sets the wall-clock time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Total number of transformations.
    #[must_use]
    pub fn total_transformations(&self) -> usize {
        self.instructions_removed
            + self.opaque_predicates_removed
            + self.try_catch_removed
            + self.methods_removed
            + self.fields_removed
            + self.multipliers_cancelled
            + self.constants_folded
            + self.methods_straightened
            + self.gotos_removed
            + self.field_owners_resolved
            + self.classes_sorted
            + self.classes_renamed
            + self.methods_renamed
            + self.fields_renamed
    }

    /// Human-readable summary of the non-zero counters.
    #[must_use]
    pub fn summary(&self) -> String {
        let counters = [
            (self.methods_transformed, "methods"),
            (self.instructions_removed, "dead instructions"),
            (self.opaque_predicates_removed, "opaque predicates"),
            (self.try_catch_removed, "try-catch blocks"),
            (self.methods_removed, "methods removed"),
            (self.fields_removed, "fields removed"),
            (self.multipliers_cancelled, "multipliers cancelled"),
            (self.constants_folded, "constants folded"),
            (self.methods_straightened, "methods straightened"),
            (self.gotos_removed, "gotos removed"),
            (self.field_owners_resolved, "field owners resolved"),
            (self.classes_sorted, "classes sorted"),
            (self.classes_renamed, "classes renamed"),
            (self.methods_renamed, "methods renamed"),
            (self.fields_renamed, "fields renamed"),
            (self.warnings, "warnings"),
            (self.errors, "errors"),
        ];
        let mut parts: Vec<String> = counters
            .iter()
            .filter(|(count, _)| *count > 0)
            .map(|(count, label)| format!("{count} {label}"))
            .collect();
        if !self.total_time.is_zero() {
            parts.push(format!("{:.2?}", self.total_time));
        }
        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
