//! Declarative variant specifications.
//!
//! A YAML document next to the templates names each template and declares
//! its parameter defaults, the combinatorial axes to sweep and any
//! hand-picked variants. Resolution turns those declarations into the
//! concrete list of shader names and environments to expand.

use std::path::Path;

use serde_yaml::Value as Yaml;

use crate::error::Error;
use crate::value::{Env, Value};

#[derive(Debug)]
pub struct SpecFile {
    pub specs: Vec<TemplateSpec>,
}

/// The declarations for one template, in document order.
#[derive(Debug)]
pub struct TemplateSpec {
    pub name: String,
    pub defaults: Env,
    pub axes: Vec<Axis>,
    pub variants: Vec<VariantDecl>,
}

/// One parameter swept over a list of values.
#[derive(Debug)]
pub struct Axis {
    pub param: String,
    pub values: Vec<AxisValue>,
}

#[derive(Debug)]
pub struct AxisValue {
    pub value: Value,
    pub suffix: Option<String>,
    pub implied: Env,
}

#[derive(Debug)]
pub struct VariantDecl {
    pub name: String,
    pub overrides: Env,
    pub axes: AxisSet,
}

/// A variant either sweeps the axes declared for the template or brings
/// its own set, which replaces the inherited one entirely.
#[derive(Debug)]
pub enum AxisSet {
    Inherit,
    Own(Vec<Axis>),
}

/// A concrete shader to generate: its final name and environment.
#[derive(Debug)]
pub struct ResolvedVariant {
    pub name: String,
    pub env: Env,
}

impl SpecFile {
    pub fn parse(text: &str, file: &Path) -> Result<SpecFile, Error> {
        if text.trim().is_empty() {
            return Ok(SpecFile { specs: Vec::new() });
        }

        let document: Yaml = serde_yaml::from_str(text).map_err(|error| Error::Specification {
            file: file.to_owned(),
            message: error.to_string(),
        })?;

        let mapping = match untag(document) {
            Yaml::Mapping(mapping) => mapping,
            Yaml::Null => return Ok(SpecFile { specs: Vec::new() }),
            _ => {
                return Err(Error::Specification {
                    file: file.to_owned(),
                    message: "expected a mapping of template names".to_owned(),
                })
            }
        };

        let mut specs = Vec::new();
        for (key, value) in mapping {
            let name = match untag(key) {
                Yaml::String(name) => name,
                _ => {
                    return Err(Error::Specification {
                        file: file.to_owned(),
                        message: "template names must be strings".to_owned(),
                    })
                }
            };
            specs.push(TemplateSpec::parse(name, value, file)?);
        }
        Ok(SpecFile { specs })
    }
}

impl TemplateSpec {
    fn parse(name: String, yaml: Yaml, file: &Path) -> Result<TemplateSpec, Error> {
        let context = Context {
            file,
            template: &name,
        };

        let mapping = match untag(yaml) {
            Yaml::Mapping(mapping) => mapping,
            _ => return Err(context.error("expected a mapping of template settings")),
        };

        let mut defaults = Env::new();
        let mut axes = Vec::new();
        let mut variants = Vec::new();

        for (key, value) in mapping {
            match context.key(key)?.as_str() {
                "parameter_names_with_default_values" => {
                    defaults = context.env(value, "default")?;
                }
                "generate_variant_forall" => {
                    axes = context.axes(value)?;
                }
                "shader_variants" => {
                    variants = context.variants(value)?;
                }
                other => return Err(context.error(format!("unknown setting '{other}'"))),
            }
        }

        Ok(TemplateSpec {
            name,
            defaults,
            axes,
            variants,
        })
    }

    /// Expands the declared variants into concrete environments.
    ///
    /// Bindings layer from least to most specific: the base environment,
    /// the template defaults, the variant overrides and finally the axis
    /// value with anything it implies. Names grow one suffix per axis in
    /// declaration order, with the first axis varying slowest.
    pub fn resolve(&self, base: &Env) -> Vec<ResolvedVariant> {
        let implicit;
        let declared = if self.variants.is_empty() {
            // without explicit variants the template still expands once,
            // named after itself
            implicit = [VariantDecl {
                name: self.name.clone(),
                overrides: Env::new(),
                axes: AxisSet::Inherit,
            }];
            &implicit[..]
        } else {
            &self.variants[..]
        };

        let mut resolved = Vec::new();
        for variant in declared {
            let axes = match &variant.axes {
                AxisSet::Inherit => &self.axes[..],
                AxisSet::Own(own) => &own[..],
            };

            let mut shared = base.clone();
            shared.extend(self.defaults.clone());
            shared.extend(variant.overrides.clone());

            for combo in combinations(axes) {
                let mut env = shared.clone();
                let mut name = variant.name.clone();
                for (axis, value) in axes.iter().zip(combo) {
                    env.insert(axis.param.clone(), value.value.clone());
                    env.extend(value.implied.clone());

                    let suffix = match &value.suffix {
                        Some(suffix) => suffix.clone(),
                        None => value.value.to_string(),
                    };
                    if !suffix.is_empty() {
                        name.push('_');
                        name.push_str(&suffix);
                    }
                }
                resolved.push(ResolvedVariant { name, env });
            }
        }
        resolved
    }
}

/// Cartesian product over the axis values, first axis slowest. No axes
/// yields a single empty combination; an axis with no values yields none.
fn combinations(axes: &[Axis]) -> Vec<Vec<&AxisValue>> {
    let mut combos: Vec<Vec<&AxisValue>> = vec![Vec::new()];
    for axis in axes {
        let mut next = Vec::with_capacity(combos.len() * axis.values.len());
        for combo in &combos {
            for value in &axis.values {
                let mut extended = combo.clone();
                extended.push(value);
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

fn untag(mut value: Yaml) -> Yaml {
    while let Yaml::Tagged(tagged) = value {
        value = tagged.value;
    }
    value
}

struct Context<'a> {
    file: &'a Path,
    template: &'a str,
}

impl Context<'_> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::Specification {
            file: self.file.to_owned(),
            message: format!("template '{}': {}", self.template, message.into()),
        }
    }

    fn key(&self, yaml: Yaml) -> Result<String, Error> {
        match untag(yaml) {
            Yaml::String(text) => Ok(text),
            _ => Err(self.error("keys must be strings")),
        }
    }

    fn value(&self, yaml: &Yaml, what: &str) -> Result<Value, Error> {
        Value::from_yaml(yaml).map_err(|error| self.error(format!("{what}: {error}")))
    }

    fn env(&self, yaml: Yaml, what: &str) -> Result<Env, Error> {
        let mapping = match untag(yaml) {
            Yaml::Mapping(mapping) => mapping,
            _ => return Err(self.error(format!("{what} values must form a mapping"))),
        };

        let mut env = Env::new();
        for (key, value) in mapping {
            let param = self.key(key)?;
            let value = self.value(&value, &format!("{what} '{param}'"))?;
            env.insert(param, value);
        }
        Ok(env)
    }

    fn axes(&self, yaml: Yaml) -> Result<Vec<Axis>, Error> {
        let mapping = match untag(yaml) {
            Yaml::Mapping(mapping) => mapping,
            _ => return Err(self.error("'generate_variant_forall' must be a mapping")),
        };

        let mut axes = Vec::new();
        for (key, value) in mapping {
            let param = self.key(key)?;
            let entries = match untag(value) {
                Yaml::Sequence(entries) => entries,
                _ => return Err(self.error(format!("axis '{param}' must list its values"))),
            };

            let mut values = Vec::new();
            for entry in entries {
                values.push(self.axis_value(&param, entry)?);
            }
            axes.push(Axis { param, values });
        }
        Ok(axes)
    }

    fn axis_value(&self, param: &str, yaml: Yaml) -> Result<AxisValue, Error> {
        let mapping = match untag(yaml) {
            Yaml::Mapping(mapping) => mapping,
            _ => return Err(self.error(format!("axis '{param}' entries must be mappings"))),
        };

        let mut value = None;
        let mut suffix = None;
        let mut implied = Env::new();
        for (key, entry) in mapping {
            let key = self.key(key)?;
            match key.as_str() {
                "VALUE" => value = Some(self.value(&entry, &format!("axis '{param}' value"))?),
                "SUFFIX" => suffix = Some(self.suffix(entry, param)?),
                _ => {
                    let entry = self.value(&entry, &format!("axis '{param}' binding '{key}'"))?;
                    implied.insert(key, entry);
                }
            }
        }

        match value {
            Some(value) => Ok(AxisValue {
                value,
                suffix,
                implied,
            }),
            None => Err(self.error(format!("axis '{param}' entry is missing VALUE"))),
        }
    }

    fn suffix(&self, yaml: Yaml, param: &str) -> Result<String, Error> {
        match untag(yaml) {
            Yaml::String(text) => Ok(text),
            Yaml::Bool(flag) => Ok(flag.to_string()),
            Yaml::Number(number) => Ok(number.to_string()),
            _ => Err(self.error(format!("axis '{param}' SUFFIX must be a scalar"))),
        }
    }

    fn variants(&self, yaml: Yaml) -> Result<Vec<VariantDecl>, Error> {
        let entries = match untag(yaml) {
            Yaml::Sequence(entries) => entries,
            _ => return Err(self.error("'shader_variants' must be a sequence")),
        };

        let mut variants = Vec::new();
        for entry in entries {
            let mapping = match untag(entry) {
                Yaml::Mapping(mapping) => mapping,
                _ => return Err(self.error("variant entries must be mappings")),
            };

            let mut name = None;
            let mut overrides = Env::new();
            let mut axes = AxisSet::Inherit;
            for (key, value) in mapping {
                let key = self.key(key)?;
                match key.as_str() {
                    "NAME" => match untag(value) {
                        Yaml::String(text) => name = Some(text),
                        _ => return Err(self.error("variant NAME must be a string")),
                    },
                    "generate_variant_forall" => axes = AxisSet::Own(self.axes(value)?),
                    _ => {
                        let value = self.value(&value, &format!("variant override '{key}'"))?;
                        overrides.insert(key, value);
                    }
                }
            }

            match name {
                Some(name) => variants.push(VariantDecl {
                    name,
                    overrides,
                    axes,
                }),
                None => return Err(self.error("variant entry is missing NAME")),
            }
        }
        Ok(variants)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    const FIXTURE: &str = indoc! {r#"
        test_shader:
          parameter_names_with_default_values:
            DTYPE: float
            INPLACE: false
            OPERATOR: X + 3
            ITER: !python/tuple [3, 5]
          generate_variant_forall:
            INPLACE:
              - VALUE: false
                SUFFIX: ""
              - VALUE: true
                SUFFIX: inplace
            DTYPE:
              - VALUE: int8
              - VALUE: uint8
              - VALUE: int
              - VALUE: uint
              - VALUE: float
          shader_variants:
            - NAME: test_shader_1
            - NAME: test_shader_2
              OPERATOR: X * 2
              ITER: !python/tuple [2, 4]
            - NAME: test_shader_3
              OPERATOR: X - 1
              ITER: !python/tuple [3, 2]
              generate_variant_forall:
                DTYPE:
                  - VALUE: float
                  - VALUE: int
    "#};

    fn parse(text: &str) -> SpecFile {
        SpecFile::parse(text, Path::new("specs.yaml")).unwrap()
    }

    fn parse_err(text: &str) -> String {
        match SpecFile::parse(text, Path::new("specs.yaml")) {
            Err(Error::Specification { message, .. }) => message,
            other => panic!("expected a specification error, got {other:?}"),
        }
    }

    fn str_value(text: &str) -> Value {
        Value::Str(text.to_owned())
    }

    fn tuple(items: &[i64]) -> Value {
        Value::Tuple(items.iter().map(|item| Value::Int(*item)).collect())
    }

    fn base() -> Env {
        Env::from([("PRECISION".to_owned(), str_value("highp"))])
    }

    #[test]
    fn fixture_structure() {
        let file = parse(FIXTURE);
        assert_eq!(file.specs.len(), 1);

        let spec = &file.specs[0];
        assert_eq!(spec.name, "test_shader");
        assert_eq!(spec.defaults.get("DTYPE"), Some(&str_value("float")));
        assert_eq!(spec.defaults.get("INPLACE"), Some(&Value::Bool(false)));
        assert_eq!(spec.defaults.get("OPERATOR"), Some(&str_value("X + 3")));
        assert_eq!(spec.defaults.get("ITER"), Some(&tuple(&[3, 5])));

        assert_eq!(spec.axes.len(), 2);
        assert_eq!(spec.axes[0].param, "INPLACE");
        assert_eq!(spec.axes[0].values[0].value, Value::Bool(false));
        assert_eq!(spec.axes[0].values[0].suffix.as_deref(), Some(""));
        assert_eq!(spec.axes[0].values[1].value, Value::Bool(true));
        assert_eq!(spec.axes[0].values[1].suffix.as_deref(), Some("inplace"));
        assert_eq!(spec.axes[1].param, "DTYPE");
        assert_eq!(spec.axes[1].values.len(), 5);
        assert!(spec.axes[1].values.iter().all(|value| value.suffix.is_none()));

        assert_eq!(spec.variants.len(), 3);
        assert_eq!(spec.variants[0].name, "test_shader_1");
        assert!(spec.variants[0].overrides.is_empty());
        assert!(matches!(spec.variants[0].axes, AxisSet::Inherit));
        assert_eq!(
            spec.variants[1].overrides.get("OPERATOR"),
            Some(&str_value("X * 2"))
        );
        assert_eq!(spec.variants[1].overrides.get("ITER"), Some(&tuple(&[2, 4])));
        match &spec.variants[2].axes {
            AxisSet::Own(axes) => {
                assert_eq!(axes.len(), 1);
                assert_eq!(axes[0].param, "DTYPE");
                assert_eq!(axes[0].values.len(), 2);
            }
            AxisSet::Inherit => panic!("expected the variant to carry its own axes"),
        }
    }

    #[test]
    fn resolve_expands_axes_in_declaration_order() {
        let file = parse(FIXTURE);
        let resolved = file.specs[0].resolve(&base());

        let names: Vec<&str> = resolved.iter().map(|variant| variant.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "test_shader_1_int8",
                "test_shader_1_uint8",
                "test_shader_1_int",
                "test_shader_1_uint",
                "test_shader_1_float",
                "test_shader_1_inplace_int8",
                "test_shader_1_inplace_uint8",
                "test_shader_1_inplace_int",
                "test_shader_1_inplace_uint",
                "test_shader_1_inplace_float",
                "test_shader_2_int8",
                "test_shader_2_uint8",
                "test_shader_2_int",
                "test_shader_2_uint",
                "test_shader_2_float",
                "test_shader_2_inplace_int8",
                "test_shader_2_inplace_uint8",
                "test_shader_2_inplace_int",
                "test_shader_2_inplace_uint",
                "test_shader_2_inplace_float",
                "test_shader_3_float",
                "test_shader_3_int",
            ]
        );
    }

    #[test]
    fn resolve_layers_the_environment() {
        let file = parse(FIXTURE);
        let resolved = file.specs[0].resolve(&base());
        let find = |name: &str| {
            resolved
                .iter()
                .find(|variant| variant.name == name)
                .unwrap_or_else(|| panic!("missing variant {name}"))
        };

        let first = find("test_shader_1_int8");
        assert_eq!(first.env.get("PRECISION"), Some(&str_value("highp")));
        assert_eq!(first.env.get("DTYPE"), Some(&str_value("int8")));
        assert_eq!(first.env.get("INPLACE"), Some(&Value::Bool(false)));
        assert_eq!(first.env.get("OPERATOR"), Some(&str_value("X + 3")));
        assert_eq!(first.env.get("ITER"), Some(&tuple(&[3, 5])));

        let inplace = find("test_shader_1_inplace_float");
        assert_eq!(inplace.env.get("INPLACE"), Some(&Value::Bool(true)));
        assert_eq!(inplace.env.get("DTYPE"), Some(&str_value("float")));

        let second = find("test_shader_2_uint");
        assert_eq!(second.env.get("OPERATOR"), Some(&str_value("X * 2")));
        assert_eq!(second.env.get("ITER"), Some(&tuple(&[2, 4])));

        // the third variant swaps in its own axes but keeps the defaults
        let third = find("test_shader_3_int");
        assert_eq!(third.env.get("OPERATOR"), Some(&str_value("X - 1")));
        assert_eq!(third.env.get("ITER"), Some(&tuple(&[3, 2])));
        assert_eq!(third.env.get("INPLACE"), Some(&Value::Bool(false)));
    }

    #[test]
    fn spec_without_variants_expands_once_under_its_own_name() {
        let file = parse(indoc! {r"
            blur:
              parameter_names_with_default_values:
                RADIUS: 3
        "});
        let resolved = file.specs[0].resolve(&Env::new());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "blur");
        assert_eq!(resolved[0].env.get("RADIUS"), Some(&Value::Int(3)));
    }

    #[test]
    fn implicit_variant_still_sweeps_the_axes() {
        let file = parse(indoc! {r"
            blur:
              generate_variant_forall:
                MODE:
                  - VALUE: fast
                  - VALUE: exact
        "});
        let names: Vec<String> = file.specs[0]
            .resolve(&Env::new())
            .into_iter()
            .map(|variant| variant.name)
            .collect();
        assert_eq!(names, ["blur_fast", "blur_exact"]);
    }

    #[test]
    fn empty_axis_yields_no_variants() {
        let file = parse(indoc! {r"
            noop:
              generate_variant_forall:
                MODE: []
              shader_variants:
                - NAME: noop_1
        "});
        assert!(file.specs[0].resolve(&Env::new()).is_empty());
    }

    #[test]
    fn axis_bindings_override_variant_overrides() {
        let file = parse(indoc! {r"
            tmpl:
              generate_variant_forall:
                DTYPE:
                  - VALUE: int
                    FORMAT: rgba32i
              shader_variants:
                - NAME: a
                  DTYPE: float
                  FORMAT: rgba16f
        "});
        let resolved = file.specs[0].resolve(&Env::new());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "a_int");
        assert_eq!(resolved[0].env.get("DTYPE"), Some(&str_value("int")));
        assert_eq!(resolved[0].env.get("FORMAT"), Some(&str_value("rgba32i")));
    }

    #[test]
    fn later_axes_win_on_shared_bindings() {
        let file = parse(indoc! {r"
            tmpl:
              generate_variant_forall:
                A:
                  - VALUE: 1
                    SHARED: first
                B:
                  - VALUE: 2
                    SHARED: second
        "});
        let resolved = file.specs[0].resolve(&Env::new());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "tmpl_1_2");
        assert_eq!(resolved[0].env.get("SHARED"), Some(&str_value("second")));
    }

    #[test]
    fn document_order_is_preserved() {
        let file = parse(indoc! {r"
            second:
              parameter_names_with_default_values:
                X: 1
            first:
              parameter_names_with_default_values:
                X: 2
        "});
        let names: Vec<&str> = file.specs.iter().map(|spec| spec.name.as_str()).collect();
        assert_eq!(names, ["second", "first"]);
    }

    #[test]
    fn empty_documents_hold_no_specs() {
        assert!(parse("").specs.is_empty());
        assert!(parse("\n# nothing here\n").specs.is_empty());
    }

    #[test]
    fn malformed_declarations_are_rejected() {
        let message = parse_err(indoc! {r"
            tmpl:
              generate_variant_forall:
                DTYPE:
                  - SUFFIX: x
        "});
        assert!(message.contains("missing VALUE"), "{message}");

        let message = parse_err(indoc! {r"
            tmpl:
              shader_variants:
                - OPERATOR: X + 1
        "});
        assert!(message.contains("missing NAME"), "{message}");

        let message = parse_err(indoc! {r"
            tmpl:
              parameter_defaults:
                X: 1
        "});
        assert!(message.contains("unknown setting"), "{message}");

        let message = parse_err(indoc! {r"
            tmpl:
              parameter_names_with_default_values:
                SCALE: 1.5
        "});
        assert!(message.contains("floating point"), "{message}");

        let message = parse_err(indoc! {r"
            tmpl:
              shader_variants:
                NAME: a
        "});
        assert!(message.contains("sequence"), "{message}");
    }
}
