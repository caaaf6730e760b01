use std::path::Path;

use anyhow::Context;
use jarscope::deobfuscation::{
    DeobfuscationEngine, DeobfuscationResult, DerivedStats, EngineConfig, PassKind,
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{file_display_name, load_jar},
};

#[derive(Debug, Serialize)]
struct DeobfuscationReport {
    file: String,
    output: String,
    sha1: String,
    classes: usize,
    passes: Vec<PassReport>,
    time_ms: u128,
    stats: StatsReport,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PassReport {
    name: &'static str,
    priority: u32,
    events: usize,
    time_ms: u128,
}

#[derive(Debug, Serialize)]
struct StatsReport {
    methods_transformed: usize,
    instructions_removed: usize,
    opaque_predicates_removed: usize,
    try_catch_removed: usize,
    methods_removed: usize,
    fields_removed: usize,
    multipliers_cancelled: usize,
    constants_folded: usize,
    methods_straightened: usize,
    gotos_removed: usize,
    field_owners_resolved: usize,
    classes_sorted: usize,
    classes_renamed: usize,
    methods_renamed: usize,
    fields_renamed: usize,
}

impl From<&DerivedStats> for StatsReport {
    fn from(stats: &DerivedStats) -> Self {
        StatsReport {
            methods_transformed: stats.methods_transformed,
            instructions_removed: stats.instructions_removed,
            opaque_predicates_removed: stats.opaque_predicates_removed,
            try_catch_removed: stats.try_catch_removed,
            methods_removed: stats.methods_removed,
            fields_removed: stats.fields_removed,
            multipliers_cancelled: stats.multipliers_cancelled,
            constants_folded: stats.constants_folded,
            methods_straightened: stats.methods_straightened,
            gotos_removed: stats.gotos_removed,
            field_owners_resolved: stats.field_owners_resolved,
            classes_sorted: stats.classes_sorted,
            classes_renamed: stats.classes_renamed,
            methods_renamed: stats.methods_renamed,
            fields_renamed: stats.fields_renamed,
        }
    }
}

pub struct DeobfuscateOptions<'a> {
    pub output: &'a Path,
    pub rename: bool,
    pub aggressive: bool,
    pub disable: &'a [PassKind],
    pub only: &'a [PassKind],
    pub show_stats: bool,
    pub report: Option<&'a Path>,
    pub global: &'a GlobalOptions,
}

pub fn run(source: &Path, opts: &DeobfuscateOptions) -> anyhow::Result<()> {
    let mut jar = load_jar(source)?;

    let engine = DeobfuscationEngine::new(build_config(opts));
    let result = engine.run(jar.group_mut());

    jar.write(opts.output)
        .with_context(|| format!("failed to write output: {}", opts.output.display()))?;

    let report = build_report(source, opts.output, jar.sha1(), jar.group().len(), &result);

    if let Some(report_file) = opts.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(report_file, json)
            .with_context(|| format!("failed to write report: {}", report_file.display()))?;
        eprintln!("Report written to {}", report_file.display());
    }

    if opts.global.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    eprintln!(
        "Deobfuscation complete: {} -> {}",
        report.file, report.output
    );
    eprintln!("  Classes:     {}", report.classes);
    eprintln!("  Changes:     {}", result.summary());
    if opts.show_stats {
        display_stats(&report);
    }
    #[allow(clippy::cast_precision_loss)]
    let time_secs = report.time_ms as f64 / 1000.0;
    eprintln!("  Time:        {time_secs:.1}s");

    if !report.warnings.is_empty() {
        eprintln!("  Warnings:    {}", report.warnings.len());
        for warning in &report.warnings {
            eprintln!("    - {warning}");
        }
    }

    Ok(())
}

fn build_config(opts: &DeobfuscateOptions) -> EngineConfig {
    if !opts.only.is_empty() {
        return EngineConfig::only(opts.only);
    }

    let mut config = if opts.aggressive {
        EngineConfig::aggressive()
    } else {
        EngineConfig::default()
    };
    if opts.rename {
        config.set_enabled(PassKind::Rename, true);
    }
    for pass in opts.disable {
        config.set_enabled(*pass, false);
    }
    config
}

fn build_report(
    input: &Path,
    output: &Path,
    sha1: &str,
    classes: usize,
    result: &DeobfuscationResult,
) -> DeobfuscationReport {
    let warnings = result
        .events
        .warnings()
        .map(|event| match (&event.class, &event.method) {
            (Some(class), Some(method)) => format!("{class}.{method}: {}", event.message),
            (Some(class), None) => format!("{class}: {}", event.message),
            _ => event.message.clone(),
        })
        .collect();

    DeobfuscationReport {
        file: file_display_name(input),
        output: file_display_name(output),
        sha1: sha1.to_string(),
        classes,
        passes: result
            .passes
            .iter()
            .map(|pass| PassReport {
                name: pass.name,
                priority: pass.priority,
                events: result.events.filter_pass(pass.name).count(),
                time_ms: pass.elapsed.as_millis(),
            })
            .collect(),
        time_ms: result.stats.total_time.as_millis(),
        stats: StatsReport::from(&result.stats),
        warnings,
    }
}

fn display_stats(report: &DeobfuscationReport) {
    for pass in &report.passes {
        eprintln!(
            "  {:<26} {:>6} events {:>6} ms",
            pass.name, pass.events, pass.time_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options<'a>(
        global: &'a GlobalOptions,
        disable: &'a [PassKind],
        only: &'a [PassKind],
    ) -> DeobfuscateOptions<'a> {
        DeobfuscateOptions {
            output: Path::new("out.jar"),
            rename: false,
            aggressive: false,
            disable,
            only,
            show_stats: false,
            report: None,
            global,
        }
    }

    #[test]
    fn test_build_config() {
        let global = GlobalOptions {
            json: false,
            verbose: false,
        };

        let config = build_config(&options(&global, &[PassKind::Goto], &[]));
        assert!(!config.is_enabled(PassKind::Goto));
        assert!(config.is_enabled(PassKind::DeadCode));
        assert!(!config.is_enabled(PassKind::Rename));

        let mut opts = options(&global, &[], &[]);
        opts.rename = true;
        assert!(build_config(&opts).is_enabled(PassKind::Rename));

        let config = build_config(&options(&global, &[], &[PassKind::Multipliers]));
        assert_eq!(config.enabled_passes(), vec![PassKind::Multipliers]);
    }
}
