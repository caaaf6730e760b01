use std::path::Path;

use jarscope::model::ClassEntry;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_jar,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct ClassRow {
    name: String,
    kind: &'static str,
    super_name: Option<String>,
    methods: usize,
    fields: usize,
    version: String,
}

#[derive(Debug, Serialize)]
struct ClassesOutput {
    sha1: String,
    classes: Vec<ClassRow>,
    count: usize,
}

impl From<&ClassEntry> for ClassRow {
    fn from(class: &ClassEntry) -> Self {
        ClassRow {
            name: class.name.clone(),
            kind: if class.is_interface() {
                "interface"
            } else {
                "class"
            },
            super_name: class.super_name.clone(),
            methods: class.methods.len(),
            fields: class.fields.len(),
            version: format!("{}.{}", class.version.0, class.version.1),
        }
    }
}

pub fn run(path: &Path, package: Option<&str>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let jar = load_jar(path)?;

    let mut classes: Vec<ClassRow> = jar
        .group()
        .iter()
        .map(|(_, class)| class)
        .filter(|class| package.map_or(true, |prefix| class.name.starts_with(prefix)))
        .map(ClassRow::from)
        .collect();
    classes.sort_by(|a, b| a.name.cmp(&b.name));

    let count = classes.len();
    let output = ClassesOutput {
        sha1: jar.sha1().to_string(),
        classes,
        count,
    };

    print_output(&output, opts, |out| {
        let mut writer = TabWriter::new(&[
            ("Name", Align::Left),
            ("Kind", Align::Left),
            ("Super", Align::Left),
            ("Methods", Align::Right),
            ("Fields", Align::Right),
            ("Version", Align::Right),
        ]);
        for row in &out.classes {
            writer.row(vec![
                row.name.clone(),
                row.kind.to_string(),
                row.super_name.clone().unwrap_or_else(|| "-".to_string()),
                row.methods.to_string(),
                row.fields.to_string(),
                row.version.clone(),
            ]);
        }
        writer.print();
        println!("\n{} class(es) listed, sha1 {}.", out.count, out.sha1);
    })
}
