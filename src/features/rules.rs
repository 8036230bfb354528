//! Declarative feature derivation.
//!
//! Rules come in three categories, always applied in this order:
//!
//! 1. normalized range: `(max - min) / (mean + ε)`
//! 2. log transform:    `ln(source + ε)`
//! 3. multiplication:   `a * b`
//!
//! Within a category rules run in the order they were configured, so a rule
//! may use the output of any earlier rule in the same or an earlier category.
//!
//! Arithmetic works on `Option<f64>`: a missing operand yields a missing
//! result for that row. Domain errors (log of a non-positive argument) are not
//! missing values; they fail the stage.

use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::{CoercionReport, StructuredTable};
use crate::error::AppError;

/// Guard added to denominators and log arguments.
pub const EPSILON: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleCategory {
    NormalizedRange,
    LogTransform,
    Multiply,
}

/// One derivation rule, producing exactly one output column.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivationRule {
    NormalizedRange {
        output: String,
        min_col: String,
        max_col: String,
        mean_col: String,
    },
    LogTransform {
        output: String,
        source: String,
    },
    Multiply {
        output: String,
        col_a: String,
        col_b: String,
    },
}

impl DerivationRule {
    pub fn output(&self) -> &str {
        match self {
            DerivationRule::NormalizedRange { output, .. }
            | DerivationRule::LogTransform { output, .. }
            | DerivationRule::Multiply { output, .. } => output,
        }
    }

    pub fn inputs(&self) -> Vec<&str> {
        match self {
            DerivationRule::NormalizedRange {
                min_col,
                max_col,
                mean_col,
                ..
            } => vec![min_col.as_str(), max_col.as_str(), mean_col.as_str()],
            DerivationRule::LogTransform { source, .. } => vec![source.as_str()],
            DerivationRule::Multiply { col_a, col_b, .. } => vec![col_a.as_str(), col_b.as_str()],
        }
    }

    pub fn category(&self) -> RuleCategory {
        match self {
            DerivationRule::NormalizedRange { .. } => RuleCategory::NormalizedRange,
            DerivationRule::LogTransform { .. } => RuleCategory::LogTransform,
            DerivationRule::Multiply { .. } => RuleCategory::Multiply,
        }
    }

    /// Compute the output column for `table` without modifying it.
    pub fn evaluate(&self, table: &StructuredTable) -> Result<Vec<Option<f64>>, AppError> {
        match self {
            DerivationRule::NormalizedRange {
                min_col,
                max_col,
                mean_col,
                ..
            } => {
                let min = table.numeric(min_col)?;
                let max = table.numeric(max_col)?;
                let mean = table.numeric(mean_col)?;
                Ok(min
                    .iter()
                    .zip(max)
                    .zip(mean)
                    .map(|((lo, hi), mu)| Some((hi.as_ref()? - lo.as_ref()?) / (mu.as_ref()? + EPSILON)))
                    .collect())
            }
            DerivationRule::LogTransform { source, .. } => {
                let values = table.numeric(source)?;
                values
                    .iter()
                    .enumerate()
                    .map(|(row, v)| match v {
                        None => Ok(None),
                        Some(x) => {
                            let arg = x + EPSILON;
                            if arg > 0.0 {
                                Ok(Some(arg.ln()))
                            } else {
                                Err(AppError::data(format!(
                                    "Log transform of `{source}` is undefined at row {row} (value {x})."
                                )))
                            }
                        }
                    })
                    .collect()
            }
            DerivationRule::Multiply { col_a, col_b, .. } => {
                let a = table.numeric(col_a)?;
                let b = table.numeric(col_b)?;
                Ok(a.iter().zip(b).map(|(x, y)| Some(x.as_ref()? * y.as_ref()?)).collect())
            }
        }
    }
}

/// An ordered rule set, decoded once from the `generate_features` config
/// section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "FeatureRulesDoc")]
pub struct FeatureRules {
    rules: Vec<DerivationRule>,
}

impl FeatureRules {
    /// Build a rule set; rules are stably reordered by category.
    pub fn new(mut rules: Vec<DerivationRule>) -> Self {
        rules.sort_by_key(DerivationRule::category);
        Self { rules }
    }

    pub fn rules(&self) -> &[DerivationRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check every rule's inputs against a starting column set, accounting for
    /// the outputs of earlier rules.
    pub fn validate_against(&self, columns: &[String]) -> Result<(), AppError> {
        let mut available: Vec<&str> = columns.iter().map(String::as_str).collect();
        for rule in &self.rules {
            if let Some(missing) = rule.inputs().into_iter().find(|c| !available.contains(c)) {
                return Err(AppError::config(format!(
                    "Rule `{}` references unknown column `{missing}`.",
                    rule.output()
                )));
            }
            available.push(rule.output());
        }
        Ok(())
    }
}

/// Result of feature generation.
#[derive(Debug, Clone)]
pub struct FeatureOutcome {
    pub table: StructuredTable,
    pub coercion: CoercionReport,
}

/// Coerce `table` to numeric and apply `rules`, returning a new table.
///
/// On error the caller's table is untouched and no partial output escapes.
pub fn generate_features(table: &StructuredTable, rules: &FeatureRules) -> Result<FeatureOutcome, AppError> {
    let (mut out, coercion) = table.coerce_numeric();
    if coercion.total() > 0 {
        info!(cells = coercion.total(), "Unparsable cells coerced to missing");
    }

    for rule in rules.rules() {
        let values = rule.evaluate(&out)?;
        debug!(output = rule.output(), category = ?rule.category(), "Applied derivation rule");
        out.set_numeric(rule.output(), values)?;
    }

    info!(rows = out.n_rows(), cols = out.n_cols(), "Generated features");
    Ok(FeatureOutcome { table: out, coercion })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NormRangeParams {
    min_col: String,
    max_col: String,
    mean_col: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MultiplyParams {
    col_a: String,
    col_b: String,
}

/// On-disk shape of the `generate_features` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FeatureRulesDoc {
    #[serde(deserialize_with = "crate::config::ordered::deserialize")]
    calculate_norm_range: Vec<(String, NormRangeParams)>,
    #[serde(deserialize_with = "crate::config::ordered::deserialize")]
    log_transform: Vec<(String, String)>,
    #[serde(deserialize_with = "crate::config::ordered::deserialize")]
    multiply: Vec<(String, MultiplyParams)>,
}

impl From<FeatureRulesDoc> for FeatureRules {
    fn from(doc: FeatureRulesDoc) -> Self {
        let norm = doc.calculate_norm_range.into_iter().map(|(output, p)| DerivationRule::NormalizedRange {
            output,
            min_col: p.min_col,
            max_col: p.max_col,
            mean_col: p.mean_col,
        });
        let log = doc
            .log_transform
            .into_iter()
            .map(|(output, source)| DerivationRule::LogTransform { output, source });
        let mult = doc.multiply.into_iter().map(|(output, p)| DerivationRule::Multiply {
            output,
            col_a: p.col_a,
            col_b: p.col_b,
        });
        FeatureRules::new(norm.chain(log).chain(mult).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Column;
    use crate::error::ErrorKind;

    fn table<const N: usize>(cols: &[(&str, [f64; N])]) -> StructuredTable {
        StructuredTable::from_columns(cols.iter().map(|(n, v)| Column::from_f64(*n, v)).collect()).unwrap()
    }

    fn norm_rule() -> DerivationRule {
        DerivationRule::NormalizedRange {
            output: "IR_norm_range".into(),
            min_col: "IR_min".into(),
            max_col: "IR_max".into(),
            mean_col: "IR_mean".into(),
        }
    }

    #[test]
    fn norm_range_happy() {
        let t = table(&[("IR_min", [1.0]), ("IR_max", [5.0]), ("IR_mean", [2.0])]);
        let out = generate_features(&t, &FeatureRules::new(vec![norm_rule()])).unwrap();
        let v = out.table.numeric("IR_norm_range").unwrap()[0].unwrap();
        assert!((v - 4.0 / (2.0 + 1e-5)).abs() < 1e-12);
        assert!((v - 2.0).abs() < 1e-4);
    }

    #[test]
    fn norm_range_missing_column_leaves_table_untouched() {
        let t = table(&[("IR_max", [5.0]), ("IR_mean", [2.0])]);
        let before = t.clone();
        let err = generate_features(&t, &FeatureRules::new(vec![norm_rule()])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(t, before);
        assert!(!t.has_column("IR_norm_range"));
    }

    #[test]
    fn log_transform_happy() {
        let t = table(&[("visible_entropy", [0.5])]);
        let rules = FeatureRules::new(vec![DerivationRule::LogTransform {
            output: "log_entropy".into(),
            source: "visible_entropy".into(),
        }]);
        let out = generate_features(&t, &rules).unwrap();
        let v = out.table.numeric("log_entropy").unwrap()[0].unwrap();
        assert!((v - (0.5f64 + 1e-5).ln()).abs() < 1e-12);
    }

    #[test]
    fn log_transform_missing_column() {
        let t = StructuredTable::default();
        let rules = FeatureRules::new(vec![DerivationRule::LogTransform {
            output: "log_entropy".into(),
            source: "visible_entropy".into(),
        }]);
        assert_eq!(generate_features(&t, &rules).unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn log_transform_of_negative_value_is_data_error() {
        let t = table(&[("x", [0.0, -1.0])]);
        let rules = FeatureRules::new(vec![DerivationRule::LogTransform {
            output: "log_x".into(),
            source: "x".into(),
        }]);
        let err = generate_features(&t, &rules).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(err.message().contains("row 1"));
    }

    #[test]
    fn multiplication_happy() {
        let t = table(&[("visible_entropy", [0.5]), ("visible_contrast", [2.0])]);
        let rules = FeatureRules::new(vec![DerivationRule::Multiply {
            output: "entropy_x_contrast".into(),
            col_a: "visible_contrast".into(),
            col_b: "visible_entropy".into(),
        }]);
        let out = generate_features(&t, &rules).unwrap();
        assert_eq!(out.table.numeric("entropy_x_contrast").unwrap()[0], Some(1.0));
    }

    #[test]
    fn multiplication_missing_column() {
        let t = table(&[("visible_entropy", [0.5])]);
        let rules = FeatureRules::new(vec![DerivationRule::Multiply {
            output: "entropy_x_contrast".into(),
            col_a: "visible_contrast".into(),
            col_b: "visible_entropy".into(),
        }]);
        assert_eq!(generate_features(&t, &rules).unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn missing_values_propagate_through_arithmetic() {
        let t = StructuredTable::from_columns(vec![
            Column::text("a", vec!["2".into(), "bad".into()]),
            Column::from_f64("b", &[3.0, 4.0]),
        ])
        .unwrap();
        let rules = FeatureRules::new(vec![DerivationRule::Multiply {
            output: "ab".into(),
            col_a: "a".into(),
            col_b: "b".into(),
        }]);
        let out = generate_features(&t, &rules).unwrap();
        assert_eq!(out.table.numeric("ab").unwrap(), &[Some(6.0), None]);
        assert_eq!(out.coercion.total(), 1);
    }

    #[test]
    fn categories_apply_in_fixed_order() {
        // Configured multiply-first, but the multiply uses the log output.
        let rules = FeatureRules::new(vec![
            DerivationRule::Multiply {
                output: "m".into(),
                col_a: "log_a".into(),
                col_b: "a".into(),
            },
            DerivationRule::LogTransform {
                output: "log_a".into(),
                source: "a".into(),
            },
        ]);
        assert_eq!(rules.rules()[0].category(), RuleCategory::LogTransform);

        let out = generate_features(&table(&[("a", [1.0])]), &rules).unwrap();
        let expected = (1.0f64 + 1e-5).ln();
        assert!((out.table.numeric("m").unwrap()[0].unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn later_category_outputs_are_not_visible_to_earlier_rules() {
        let rules = FeatureRules::new(vec![
            DerivationRule::Multiply {
                output: "m".into(),
                col_a: "a".into(),
                col_b: "a".into(),
            },
            DerivationRule::LogTransform {
                output: "log_m".into(),
                source: "m".into(),
            },
        ]);
        let cols = vec!["a".to_string()];
        assert_eq!(rules.validate_against(&cols).unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn decodes_config_section_in_document_order() {
        let yaml = r#"
calculate_norm_range:
  IR_norm_range: {min_col: IR_min, max_col: IR_max, mean_col: IR_mean}
log_transform:
  log_entropy: visible_entropy
  log_contrast: visible_contrast
multiply:
  entropy_x_contrast: {col_a: visible_contrast, col_b: visible_entropy}
"#;
        let rules: FeatureRules = serde_yaml::from_str(yaml).unwrap();
        let outputs: Vec<&str> = rules.rules().iter().map(DerivationRule::output).collect();
        assert_eq!(
            outputs,
            vec!["IR_norm_range", "log_entropy", "log_contrast", "entropy_x_contrast"]
        );
    }
}
