//! The transformer trait and per-method helpers shared by the passes.
//!
//! Every pass implements [`Transformer`]. The engine sorts passes by
//! [`Transformer::priority`] and runs them one after the other against the same
//! [`ClassGroup`]; a pass never starts before the previous one finished.

use rayon::prelude::*;

use crate::{
    deobfuscation::{
        config::{EngineConfig, PassKind},
        events::{EventBuilder, EventKind, EventLog},
    },
    model::{ClassEntry, ClassGroup, MethodEntry},
    Error,
};

/// Shared state handed to every pass.
pub struct PassContext<'a> {
    /// The run configuration.
    pub config: &'a EngineConfig,
    /// Event sink for transformations and diagnostics.
    pub events: &'a EventLog,
}

impl<'a> PassContext<'a> {
    /// Creates a context.
    #[must_use]
    pub fn new(config: &'a EngineConfig, events: &'a EventLog) -> Self {
        PassContext { config, events }
    }

    /// Starts an event attributed to `pass`.
    pub fn record(&self, pass: &dyn Transformer, kind: EventKind) -> EventBuilder<'a> {
        self.events.record(kind).pass(pass.name())
    }

    /// Starts an event about `owner.method`, attributed to `pass`.
    pub fn record_in(
        &self,
        pass: &dyn Transformer,
        kind: EventKind,
        owner: &str,
        method: &MethodEntry,
    ) -> EventBuilder<'a> {
        self.record(pass, kind)
            .class(owner)
            .method(format!("{}{}", method.name, method.desc))
    }

    /// Logs a tolerated per-method fault and records it as a warning.
    pub fn fault(&self, pass: &dyn Transformer, owner: &str, method: &MethodEntry, error: &Error) {
        log::warn!("{}: skipping {}: {}", pass.name(), method.display_name(owner), error);
        self.record_in(pass, EventKind::Warning, owner, method)
            .message(error.to_string());
    }
}

/// A deobfuscation pass over a whole class group.
///
/// Passes must be `Send + Sync`; per-method work may run on the rayon pool. Passes report
/// what they did only through logging and the event log.
pub trait Transformer: Send + Sync {
    /// Unique name for logging and events.
    fn name(&self) -> &'static str;

    /// The configuration switch of this pass.
    fn kind(&self) -> PassKind;

    /// Position in the pipeline; lower runs first.
    fn priority(&self) -> u32;

    /// What this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Runs the pass.
    fn transform(&self, group: &mut ClassGroup, ctx: &PassContext<'_>);
}

/// Applies `f` to every method with a body, passing the owning class name.
///
/// Classes are processed on the rayon pool when [`EngineConfig::parallel`] is set.
pub fn for_each_method<F>(group: &mut ClassGroup, ctx: &PassContext<'_>, f: F)
where
    F: Fn(&str, &mut MethodEntry) + Send + Sync,
{
    let visit = |class: &mut ClassEntry| {
        let ClassEntry { name, methods, .. } = class;
        for method in methods.iter_mut().filter(|m| m.code.is_some()) {
            f(name, method);
        }
    };

    if ctx.config.parallel {
        group.par_iter_mut().for_each(visit);
    } else {
        group.iter_mut().for_each(visit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::Code, model::MethodAccessFlags};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_for_each_method_skips_abstract() {
        let mut class = ClassEntry::new("a");
        class.methods.push(
            MethodEntry::new("m", "()V", MethodAccessFlags::PUBLIC).with_code(Code::new()),
        );
        class
            .methods
            .push(MethodEntry::new("n", "()V", MethodAccessFlags::ABSTRACT));
        let mut group = ClassGroup::from_classes([class, ClassEntry::new("b")]).unwrap();

        for parallel in [true, false] {
            let config = EngineConfig::default().with_parallel(parallel);
            let events = EventLog::new();
            let ctx = PassContext::new(&config, &events);
            let seen = AtomicUsize::new(0);
            for_each_method(&mut group, &ctx, |owner, method| {
                assert_eq!(owner, "a");
                assert_eq!(method.name, "m");
                seen.fetch_add(1, Ordering::Relaxed);
            });
            assert_eq!(seen.load(Ordering::Relaxed), 1);
        }
    }
}
