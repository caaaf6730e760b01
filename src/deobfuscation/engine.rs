//! Main deobfuscation engine.
//!
//! The [`DeobfuscationEngine`] is the main entry point for deobfuscating a
//! [`ClassGroup`]. It owns the ordered pass list and runs it once, strictly in priority
//! order, against the group.

use std::time::Instant;

use crate::{
    deobfuscation::{
        config::EngineConfig,
        events::EventLog,
        pass::{PassContext, Transformer},
        passes::{
            ControlFlowStraightener, DeadCodeRemover, ErrorConstructorRemover,
            FieldOwnerResolver, GotoRemover, MemberSorter, MultiplierRemover,
            OpaquePredicateRemover, Renamer, TryCatchBlockRemover, UnusedFieldRemover,
        },
        result::{DeobfuscationResult, PassTiming},
    },
    model::ClassGroup,
};

/// Main deobfuscation engine.
///
/// The pipeline is fixed by priority:
///
/// 1. **Cleanup**: dead code, decoy try/catch entries, error constructors
/// 2. **Predicates**: opaque guard removal
/// 3. **Arithmetic**: multiplier cancellation and constant folding
/// 4. **Layout**: straightening, redundant jumps
/// 5. **Members**: field owners, unused fields, ordering, renaming
///
/// Each pass sees the group only after the previous one has finished with it.
///
/// # Example
///
/// ```rust,ignore
/// use jarscope::{deobfuscation::{DeobfuscationEngine, EngineConfig}, file::JarArchive};
///
/// let mut jar = JarArchive::open(Path::new("gamepack.jar"))?;
/// let engine = DeobfuscationEngine::new(EngineConfig::default().with_rename(true));
/// let result = engine.run(jar.group_mut());
/// println!("{}", result.summary());
/// jar.write(Path::new("clean.jar"))?;
/// ```
pub struct DeobfuscationEngine {
    /// Configuration.
    config: EngineConfig,
    /// Passes, sorted by priority.
    passes: Vec<Box<dyn Transformer>>,
}

impl Default for DeobfuscationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl DeobfuscationEngine {
    /// Creates an engine running every standard pass `config` enables.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let standard: Vec<Box<dyn Transformer>> = vec![
            Box::new(DeadCodeRemover),
            Box::new(TryCatchBlockRemover),
            Box::new(ErrorConstructorRemover),
            Box::new(OpaquePredicateRemover),
            Box::new(MultiplierRemover),
            Box::new(ControlFlowStraightener),
            Box::new(GotoRemover),
            Box::new(FieldOwnerResolver),
            Box::new(UnusedFieldRemover),
            Box::new(MemberSorter),
            Box::new(Renamer),
        ];

        let mut engine = DeobfuscationEngine {
            config,
            passes: Vec::new(),
        };
        for pass in standard {
            if engine.config.is_enabled(pass.kind()) {
                engine.add_pass(pass);
            }
        }
        engine
    }

    /// Creates an engine with no passes registered.
    #[must_use]
    pub fn empty(config: EngineConfig) -> Self {
        DeobfuscationEngine {
            config,
            passes: Vec::new(),
        }
    }

    /// Registers an additional pass. Passes sharing a priority run in registration order.
    pub fn add_pass(&mut self, pass: Box<dyn Transformer>) {
        self.passes.push(pass);
        self.passes.sort_by_key(|p| p.priority());
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Names of the registered passes, in run order.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs every registered pass over `group`.
    ///
    /// Per-method analysis faults never abort the run; they show up as warnings in the
    /// returned event log.
    pub fn run(&self, group: &mut ClassGroup) -> DeobfuscationResult {
        let events = EventLog::new();
        let ctx = PassContext::new(&self.config, &events);
        let start = Instant::now();
        let mut timings = Vec::with_capacity(self.passes.len());

        log::info!(
            "Running {} passes over {} classes",
            self.passes.len(),
            group.len()
        );
        for pass in &self.passes {
            log::debug!("{} (priority {}): {}", pass.name(), pass.priority(), pass.description());
            let pass_start = Instant::now();
            pass.transform(group, &ctx);
            let elapsed = pass_start.elapsed();
            log::debug!("{} finished in {:.2?}", pass.name(), elapsed);
            timings.push(PassTiming {
                name: pass.name(),
                priority: pass.priority(),
                elapsed,
            });
        }

        let result = DeobfuscationResult::new(events, timings, start.elapsed());
        log::info!("{}", result.summary());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscation::{config::PassKind, events::EventKind};

    struct Marker(u32, &'static str);

    impl Transformer for Marker {
        fn name(&self) -> &'static str {
            self.1
        }

        fn kind(&self) -> PassKind {
            PassKind::Goto
        }

        fn priority(&self) -> u32 {
            self.0
        }

        fn transform(&self, _group: &mut ClassGroup, ctx: &PassContext<'_>) {
            ctx.record(self, EventKind::Info).message(self.1);
        }
    }

    #[test]
    fn test_default_pass_order() {
        let engine = DeobfuscationEngine::default();
        assert_eq!(
            engine.pass_names(),
            vec![
                "DeadCodeRemover",
                "TryCatchBlockRemover",
                "ErrorConstructorRemover",
                "OpaquePredicateRemover",
                "MultiplierRemover",
                "GotoRemover",
                "UnusedFieldRemover",
            ]
        );
    }

    #[test]
    fn test_aggressive_runs_renamer_last() {
        let engine = DeobfuscationEngine::new(EngineConfig::aggressive());
        assert_eq!(engine.pass_names().len(), 11);
        assert_eq!(engine.pass_names().last(), Some(&"Renamer"));
    }

    #[test]
    fn test_custom_passes_run_by_priority() {
        let mut engine = DeobfuscationEngine::empty(EngineConfig::default());
        engine.add_pass(Box::new(Marker(5, "late")));
        engine.add_pass(Box::new(Marker(1, "early")));
        engine.add_pass(Box::new(Marker(5, "later")));

        let mut group = ClassGroup::new();
        let result = engine.run(&mut group);
        let order: Vec<&str> = result.events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(order, vec!["early", "late", "later"]);
        assert_eq!(result.passes.len(), 3);
        assert_eq!(result.passes[0].priority, 1);
    }
}
