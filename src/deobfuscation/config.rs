//! Configuration for the deobfuscation engine.
//!
//! [`EngineConfig`] selects the passes of a run and carries the few constants the passes
//! match against (exception types, renaming threshold) plus the analysis budget.

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::analysis::DEFAULT_MAX_ITERATIONS;

/// Names every pass of the pipeline.
///
/// Parses from and displays as the snake-case name used on the command line, e.g.
/// `"opaque_predicates"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum PassKind {
    /// Removal of unreachable instructions.
    DeadCode,
    /// Removal of decoy try/catch entries.
    TryCatch,
    /// Removal of synthetic throwing constructors.
    ErrorConstructors,
    /// Removal of guard-value opaque predicates.
    OpaquePredicates,
    /// Cancellation of field multipliers and constant folding.
    Multipliers,
    /// Block re-layout in control-flow order.
    ControlFlow,
    /// Removal of jumps to the next label.
    Goto,
    /// Removal of unused final fields.
    UnusedFields,
    /// Rewriting of field owners to the declaring class.
    FieldOwners,
    /// Deterministic member ordering.
    SortMembers,
    /// Placeholder renaming across the hierarchy.
    Rename,
}

/// Configuration for the deobfuscation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Remove unreachable code (default: on).
    pub enable_dead_code: bool,

    /// Remove try/catch entries catching [`EngineConfig::decoy_exception`] (default: on).
    pub enable_try_catch: bool,

    /// Remove synthetic throwing constructors (default: on).
    pub enable_error_constructors: bool,

    /// Remove opaque predicate guards (default: on).
    pub enable_opaque_predicates: bool,

    /// Cancel field multipliers and fold constant arithmetic (default: on).
    pub enable_multipliers: bool,

    /// Re-lay out method bodies in control-flow order (default: off).
    pub enable_control_flow: bool,

    /// Remove jumps to the immediately following label (default: on).
    pub enable_goto: bool,

    /// Remove `final` fields that no instruction references (default: on).
    pub enable_unused_fields: bool,

    /// Rewrite field instruction owners to the declaring class (default: off).
    pub enable_field_owners: bool,

    /// Sort methods by line number and fields by modifiers (default: off).
    pub enable_sort_members: bool,

    /// Rename short obfuscated names to placeholders (default: off).
    pub enable_rename: bool,

    /// Exception type caught by decoy try/catch entries.
    pub decoy_exception: String,

    /// Exception type thrown by opaque predicate decoy paths.
    pub guard_exception: String,

    /// Sole declared exception of synthetic throwing constructors.
    pub error_constructor_throwable: String,

    /// Class and member names up to this length are considered obfuscated (default: 2).
    pub short_name_threshold: usize,

    /// Bound on analyzer instruction visits per method.
    pub max_analysis_iterations: usize,

    /// Run per-method work of a pass on the rayon pool (default: on).
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_dead_code: true,
            enable_try_catch: true,
            enable_error_constructors: true,
            enable_opaque_predicates: true,
            enable_multipliers: true,
            enable_control_flow: false,
            enable_goto: true,
            enable_unused_fields: true,
            enable_field_owners: false,
            enable_sort_members: false,
            enable_rename: false,
            decoy_exception: "java/lang/RuntimeException".to_string(),
            guard_exception: "java/lang/IllegalStateException".to_string(),
            error_constructor_throwable: "java/lang/Throwable".to_string(),
            short_name_threshold: 2,
            max_analysis_iterations: DEFAULT_MAX_ITERATIONS,
            parallel: true,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration: the core pipeline without renaming.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dead code and opaque predicate removal only.
    #[must_use]
    pub fn minimal() -> Self {
        let mut config = Self::default();
        config.set_all(false);
        config.enable_dead_code = true;
        config.enable_opaque_predicates = true;
        config
    }

    /// Every pass, renaming included.
    #[must_use]
    pub fn aggressive() -> Self {
        let mut config = Self::default();
        config.set_all(true);
        config
    }

    /// Exactly the given passes.
    #[must_use]
    pub fn only(passes: &[PassKind]) -> Self {
        let mut config = Self::default();
        config.set_all(false);
        for pass in passes {
            config.set_enabled(*pass, true);
        }
        config
    }

    fn set_all(&mut self, enabled: bool) {
        use strum::IntoEnumIterator;
        for pass in PassKind::iter() {
            self.set_enabled(pass, enabled);
        }
    }

    /// Enables or disables one pass.
    pub fn set_enabled(&mut self, pass: PassKind, enabled: bool) {
        *self.flag_mut(pass) = enabled;
    }

    /// Returns `true` if `pass` is enabled.
    #[must_use]
    pub fn is_enabled(&self, pass: PassKind) -> bool {
        match pass {
            PassKind::DeadCode => self.enable_dead_code,
            PassKind::TryCatch => self.enable_try_catch,
            PassKind::ErrorConstructors => self.enable_error_constructors,
            PassKind::OpaquePredicates => self.enable_opaque_predicates,
            PassKind::Multipliers => self.enable_multipliers,
            PassKind::ControlFlow => self.enable_control_flow,
            PassKind::Goto => self.enable_goto,
            PassKind::UnusedFields => self.enable_unused_fields,
            PassKind::FieldOwners => self.enable_field_owners,
            PassKind::SortMembers => self.enable_sort_members,
            PassKind::Rename => self.enable_rename,
        }
    }

    fn flag_mut(&mut self, pass: PassKind) -> &mut bool {
        match pass {
            PassKind::DeadCode => &mut self.enable_dead_code,
            PassKind::TryCatch => &mut self.enable_try_catch,
            PassKind::ErrorConstructors => &mut self.enable_error_constructors,
            PassKind::OpaquePredicates => &mut self.enable_opaque_predicates,
            PassKind::Multipliers => &mut self.enable_multipliers,
            PassKind::ControlFlow => &mut self.enable_control_flow,
            PassKind::Goto => &mut self.enable_goto,
            PassKind::UnusedFields => &mut self.enable_unused_fields,
            PassKind::FieldOwners => &mut self.enable_field_owners,
            PassKind::SortMembers => &mut self.enable_sort_members,
            PassKind::Rename => &mut self.enable_rename,
        }
    }

    /// Enables or disables one pass (builder pattern).
    #[must_use]
    pub fn with_pass(mut self, pass: PassKind, enabled: bool) -> Self {
        self.set_enabled(pass, enabled);
        self
    }

    /// Enables or disables the renamer.
    #[must_use]
    pub fn with_rename(mut self, enabled: bool) -> Self {
        self.enable_rename = enabled;
        self
    }

    /// Sets the decoy exception type caught by removed try/catch entries.
    #[must_use]
    pub fn with_decoy_exception(mut self, exception: impl Into<String>) -> Self {
        self.decoy_exception = exception.into();
        self
    }

    /// Sets the exception type thrown behind opaque predicates.
    #[must_use]
    pub fn with_guard_exception(mut self, exception: impl Into<String>) -> Self {
        self.guard_exception = exception.into();
        self
    }

    /// Sets the short-name threshold of the renamer.
    #[must_use]
    pub fn with_short_name_threshold(mut self, threshold: usize) -> Self {
        self.short_name_threshold = threshold;
        self
    }

    /// Sets the analyzer budget per method.
    #[must_use]
    pub fn with_max_analysis_iterations(mut self, max: usize) -> Self {
        self.max_analysis_iterations = max;
        self
    }

    /// Enables or disables parallel per-method processing.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Passes currently enabled, in declaration order.
    #[must_use]
    pub fn enabled_passes(&self) -> Vec<PassKind> {
        use strum::IntoEnumIterator;
        PassKind::iter().filter(|p| self.is_enabled(*p)).collect()
    }
}
