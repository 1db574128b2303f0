//! Minimal CLI: schema (+ layout, data, options) → (compiled form | formatted data)
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use json_form::error::FormError;
use json_form::path_de::{read_json, read_layout, read_options};
use json_form::{FormOptions, StandardWidgets, compile_form};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// compile a JSON Schema into form control and layout trees, or format raw form data against one
#[derive(Parser, Debug)]
#[command(name = "json-form", version)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// compile and print the layout, control template and pointer metadata
    Compile(CompileOut),
    /// compile, then convert raw form data to the schema's types
    Format(FormatOut),
}

#[derive(Args, Debug, Clone)]
struct FormSettings {
    /// JSON Schema file
    #[arg(long, short)]
    schema: PathBuf,

    /// compile-pass options file (camelCase keys, all optional)
    #[arg(long)]
    options: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct CompileOut {
    #[command(flatten)]
    settings: FormSettings,

    /// layout file: an array of layout elements (the whole schema if omitted)
    #[arg(long, short)]
    layout: Option<PathBuf>,

    /// prior form data seeding control values
    #[arg(long, short)]
    data: Option<PathBuf>,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct FormatOut {
    #[command(flatten)]
    settings: FormSettings,

    /// raw form data to format
    #[arg(long, short)]
    data: PathBuf,

    /// coerce values that fit no allowed type instead of dropping them
    #[arg(long)]
    fix_errors: bool,

    /// keep empty containers and unset fields (off unless given here or in the options file)
    #[arg(long)]
    return_empty_fields: bool,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl FormSettings {
    fn load(&self) -> anyhow::Result<(Value, FormOptions)> {
        let schema = read_json(&self.schema)?;
        if !schema.is_object() {
            return Err(FormError::SchemaNotObject { found: json_kind(&schema) })
                .with_context(|| format!("loading schema {}", self.schema.display()));
        }
        let options = match self.options.as_ref() {
            Some(path) => read_options(path)?,
            None => FormOptions::default(),
        };
        Ok((schema, options))
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }
    pub fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            Command::Compile(target) => {
                let (schema, options) = target.settings.load()?;
                let layout = match target.layout.as_ref() {
                    Some(path) => read_layout(path)?,
                    None => Vec::new(),
                };
                let data = target.data.as_deref().map(read_json).transpose()?;

                let form = compile_form(&schema, &layout, data, options, &StandardWidgets::default());
                let src = serde_json::to_string_pretty(&form.report()).context("serializing compiled form")?;
                write_output(target.out.as_deref(), &src)
            }
            Command::Format(target) => {
                let (schema, mut options) = target.settings.load()?;
                let from_file = target.settings.options.is_some() && options.return_empty_fields;
                options.return_empty_fields = target.return_empty_fields || from_file;
                options.fix_errors |= target.fix_errors;
                let data = read_json(&target.data)?;

                let form = compile_form(&schema, &[], Some(data.clone()), options, &StandardWidgets::default());
                let formatted = form.format(&data);
                let src = serde_json::to_string_pretty(&formatted).context("serializing formatted data")?;
                write_output(target.out.as_deref(), &src)
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn write_output(out: Option<&Path>, src: &str) -> anyhow::Result<()> {
    let Some(out) = out else {
        println!("{src}");
        return Ok(());
    };
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(out, src).with_context(|| format!("writing {}", out.display()))?;
    tracing::info!(path = %out.display(), "wrote output");
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ------------------------------- Tests ------------------------------------ //
