//! The generation pipeline: discover templates and their specifications,
//! resolve variants, expand each one and optionally hand the results to
//! glslc and a registry file.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;

use crate::error::Error;
use crate::spec::{SpecFile, TemplateSpec};
use crate::template::Template;
use crate::value::{Env, Value};

pub struct Config {
    pub src_dirs: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub glslc: Option<PathBuf>,
    pub registry: Option<PathBuf>,
    pub env: Env,
    pub jobs: usize,
    pub compile_timeout: Duration,
    pub strict: bool,
}

/// Bindings every template sees before its specification adds its own.
pub fn default_env() -> Env {
    Env::from([("PRECISION".to_owned(), Value::Str("highp".to_owned()))])
}

/// One generated shader and where its outputs ended up.
#[derive(Debug)]
pub struct Artifact {
    pub name: String,
    pub template: PathBuf,
    pub source: PathBuf,
    pub spirv: Option<PathBuf>,
}

/// A failure tied to the file, and where known the variant, it came from.
#[derive(Debug)]
pub struct Failure {
    pub origin: PathBuf,
    pub variant: Option<String>,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub artifacts: Vec<Artifact>,
    pub failures: Vec<Failure>,
}

impl RunReport {
    pub fn generation_failures(&self) -> usize {
        self.failures.len() - self.compile_failures()
    }

    pub fn compile_failures(&self) -> usize {
        self.failures
            .iter()
            .filter(|failure| matches!(failure.error, Error::Compile { .. }))
            .count()
    }
}

struct Unit<'a> {
    template: &'a Template,
    name: String,
    env: Env,
}

/// Runs the whole pipeline once.
///
/// Broken templates and specifications are reported per file, and a broken
/// variant only takes down that variant. Two variants claiming the same
/// output name abort the run before anything is written.
pub fn run(config: &Config) -> anyhow::Result<RunReport> {
    let mut report = RunReport::default();

    let (template_paths, spec_paths) = discover(config)?;
    info!(
        templates = template_paths.len(),
        specs = spec_paths.len(),
        "discovered sources"
    );

    let mut specs: BTreeMap<String, (TemplateSpec, PathBuf)> = BTreeMap::new();
    for path in &spec_paths {
        let text = read(path)?;
        let file = match SpecFile::parse(&text, path) {
            Ok(file) => file,
            Err(error) => {
                report.failures.push(Failure {
                    origin: path.clone(),
                    variant: None,
                    error,
                });
                continue;
            }
        };

        for spec in file.specs {
            match specs.get(&spec.name) {
                Some((_, first)) => report.failures.push(Failure {
                    origin: path.clone(),
                    variant: None,
                    error: Error::Specification {
                        file: path.clone(),
                        message: format!(
                            "template '{}' is already declared in '{}'",
                            spec.name,
                            first.display()
                        ),
                    },
                }),
                None => {
                    specs.insert(spec.name.clone(), (spec, path.clone()));
                }
            }
        }
    }

    let mut templates = Vec::new();
    for path in &template_paths {
        let text = read(path)?;
        match Template::parse(&text, path) {
            Ok(template) => templates.push(template),
            Err(error) => report.failures.push(Failure {
                origin: path.clone(),
                variant: None,
                error,
            }),
        }
    }

    // pair templates with their specifications by file stem
    let mut units = Vec::new();
    let mut matched = BTreeSet::new();
    for template in &templates {
        let stem = template
            .path()
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();

        match specs.get(stem) {
            Some((spec, _)) => {
                matched.insert(stem);
                for variant in spec.resolve(&config.env) {
                    let mut env = variant.env;
                    derive_format(&mut env);
                    units.push(Unit {
                        template,
                        name: variant.name,
                        env,
                    });
                }
            }
            None => {
                // a template without declarations still expands once, as
                // long as the global environment covers everything it needs
                let mut env = config.env.clone();
                derive_format(&mut env);
                let missing: Vec<String> = template
                    .free_variables()
                    .into_iter()
                    .filter(|name| !env.contains_key(name))
                    .collect();
                if missing.is_empty() {
                    units.push(Unit {
                        template,
                        name: stem.to_owned(),
                        env,
                    });
                } else {
                    warn!(
                        template = %template.path().display(),
                        ?missing,
                        "skipping template with no specification"
                    );
                }
            }
        }
    }

    for (name, (_, path)) in &specs {
        if !matched.contains(name.as_str()) {
            warn!(
                template = %name,
                spec = %path.display(),
                "specification has no matching template"
            );
        }
    }

    let mut seen: BTreeMap<&str, &Path> = BTreeMap::new();
    for unit in &units {
        match seen.get(unit.name.as_str()) {
            Some(first) => {
                return Err(Error::DuplicateName {
                    name: unit.name.clone(),
                    first: first.to_path_buf(),
                    second: unit.template.path().to_owned(),
                }
                .into());
            }
            None => {
                seen.insert(&unit.name, unit.template.path());
            }
        }
    }

    let workers = config.jobs.max(1).min(units.len().max(1));
    let expanded = parallel_map(&units, workers, |unit| unit.template.expand(&unit.env));

    std::fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("could not create '{}'", config.out_dir.display()))?;

    for (index, result) in expanded {
        let unit = &units[index];
        match result {
            Ok(text) => {
                let source = config.out_dir.join(format!("{}.glsl", unit.name));
                std::fs::write(&source, text).map_err(|error| Error::Io {
                    path: source.clone(),
                    source: error,
                })?;
                report.artifacts.push(Artifact {
                    name: unit.name.clone(),
                    template: unit.template.path().to_owned(),
                    source,
                    spirv: None,
                });
            }
            Err(error) => report.failures.push(Failure {
                origin: unit.template.path().to_owned(),
                variant: Some(unit.name.clone()),
                error,
            }),
        }
    }
    info!(shaders = report.artifacts.len(), "generated shader sources");

    if let Some(glslc) = &config.glslc {
        compile_all(config, glslc, &mut report);
    }

    if let Some(registry) = &config.registry {
        write_registry(registry, &report.artifacts)?;
    }

    Ok(report)
}

fn discover(config: &Config) -> anyhow::Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let cwd = std::env::current_dir().context("could not determine the working directory")?;
    let out_dir = cwd.join(&config.out_dir);
    let registry = config.registry.as_ref().map(|path| cwd.join(path));

    let mut templates = Vec::new();
    let mut specs = Vec::new();
    for dir in &config.src_dirs {
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry.with_context(|| format!("could not walk '{}'", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            // outputs may land inside a watched source tree
            let absolute = cwd.join(&path);
            if absolute.starts_with(&out_dir) || Some(absolute.as_path()) == registry.as_deref() {
                continue;
            }
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("glsl") => templates.push(path),
                Some("yaml" | "yml") => specs.push(path),
                _ => {}
            }
        }
    }
    templates.sort();
    specs.sort();
    Ok((templates, specs))
}

fn read(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|error| Error::Io {
        path: path.to_owned(),
        source: error,
    })
}

/// Derives an image FORMAT from DTYPE when the specification left it unset.
fn derive_format(env: &mut Env) {
    if env.contains_key("FORMAT") {
        return;
    }
    let format = match env.get("DTYPE") {
        Some(Value::Str(dtype)) => image_format(dtype),
        _ => None,
    };
    if let Some(format) = format {
        env.insert("FORMAT".to_owned(), Value::Str(format.to_owned()));
    }
}

fn image_format(dtype: &str) -> Option<&'static str> {
    match dtype {
        "float" => Some("rgba16f"),
        "int" => Some("rgba32i"),
        "uint" => Some("rgba32ui"),
        "int8" => Some("rgba8i"),
        "uint8" => Some("rgba8ui"),
        _ => None,
    }
}

/// Fans `items` out over a small pool of scoped threads, preserving order.
fn parallel_map<'a, T, R, F>(items: &'a [T], workers: usize, task: F) -> Vec<(usize, R)>
where
    T: Sync,
    R: Send,
    F: Fn(&'a T) -> R + Sync,
{
    let next = AtomicUsize::new(0);
    let (sender, receiver) = mpsc::channel();

    let mut results: Vec<(usize, R)> = std::thread::scope(|scope| {
        let next = &next;
        let task = &task;
        for _ in 0..workers {
            let sender = sender.clone();
            scope.spawn(move || loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let item = match items.get(index) {
                    Some(item) => item,
                    None => break,
                };
                if sender.send((index, task(item))).is_err() {
                    break;
                }
            });
        }
        drop(sender);
        receiver.iter().collect()
    });

    results.sort_by_key(|(index, _)| *index);
    results
}

fn compile_all(config: &Config, glslc: &Path, report: &mut RunReport) {
    let workers = config.jobs.max(1).min(report.artifacts.len().max(1));
    let results = parallel_map(&report.artifacts, workers, |artifact| {
        compile_one(config, glslc, artifact)
    });

    let mut compiled = 0usize;
    for (index, result) in results {
        match result {
            Ok(spirv) => {
                report.artifacts[index].spirv = Some(spirv);
                compiled += 1;
            }
            Err(error) => report.failures.push(Failure {
                origin: report.artifacts[index].source.clone(),
                variant: Some(report.artifacts[index].name.clone()),
                error,
            }),
        }
    }
    info!(compiled, "compiled shader binaries");
}

fn compile_one(config: &Config, glslc: &Path, artifact: &Artifact) -> Result<PathBuf, Error> {
    let output = artifact.source.with_extension("spv");

    let mut command = Command::new(glslc);
    command
        .arg("-fshader-stage=compute")
        .arg(&artifact.source)
        .arg("-o")
        .arg(&output)
        .arg("--target-env=vulkan1.0")
        .arg("-Werror");
    for dir in &config.src_dirs {
        command.arg("-I").arg(dir);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let compile_error = |message: String| Error::Compile {
        name: artifact.name.clone(),
        message,
    };

    let mut child = command
        .spawn()
        .map_err(|error| compile_error(format!("could not launch '{}': {error}", glslc.display())))?;

    let deadline = Instant::now() + config.compile_timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(compile_error(format!(
                        "timed out after {:?}",
                        config.compile_timeout
                    )));
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(error) => {
                return Err(compile_error(format!(
                    "could not wait for the compiler: {error}"
                )))
            }
        }
    };

    if status.success() {
        return Ok(output);
    }

    let mut message = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut message);
    }
    let message = message.trim();
    if message.is_empty() {
        Err(compile_error(format!("glslc exited with {status}")))
    } else {
        Err(compile_error(message.to_owned()))
    }
}

#[derive(Serialize)]
struct RegistryEntry<'a> {
    src: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    spv: Option<&'a Path>,
}

fn write_registry(path: &Path, artifacts: &[Artifact]) -> anyhow::Result<()> {
    let entries: BTreeMap<&str, RegistryEntry> = artifacts
        .iter()
        .map(|artifact| {
            let entry = RegistryEntry {
                src: &artifact.source,
                spv: artifact.spirv.as_deref(),
            };
            (artifact.name.as_str(), entry)
        })
        .collect();

    let text = serde_yaml::to_string(&entries).context("could not serialize the shader registry")?;
    std::fs::write(path, text).with_context(|| format!("could not write '{}'", path.display()))?;
    info!(registry = %path.display(), shaders = artifacts.len(), "wrote registry");
    Ok(())
}
