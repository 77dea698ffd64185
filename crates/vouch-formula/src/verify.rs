//! Instantiation, evaluation and tolerance comparison

use crate::anchor::{AnchorFormula, Axis, Compiled};
use crate::cell::CellValue;
use crate::error::FormulaError;
use crate::expr::{Expr, Op, RefTemplate, RowAnchor};
use crate::grid::TypedGrid;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vouch_state::{Discrepancy, Finding, FindingSet, RawTable, Severity};

/// Rounding allowance for reported figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Absolute allowance, in table units
    pub absolute: Decimal,
    /// Relative allowance, as a fraction of the larger magnitude
    pub relative: Decimal,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            absolute: Decimal::new(5, 1),
            relative: Decimal::new(5, 3),
        }
    }
}

impl Tolerance {
    /// Create a tolerance
    #[inline]
    #[must_use]
    pub fn new(absolute: Decimal, relative: Decimal) -> Self {
        Self { absolute, relative }
    }

    /// Largest delta accepted between `expected` and `actual`
    #[must_use]
    pub fn allowed(&self, expected: Decimal, actual: Decimal) -> Decimal {
        let scale = expected.abs().max(actual.abs());
        let relative = self.relative.checked_mul(scale).unwrap_or(Decimal::MAX);
        self.absolute.min(relative)
    }

    /// Whether `delta` is beyond the allowance
    #[inline]
    #[must_use]
    pub fn is_exceeded(&self, expected: Decimal, actual: Decimal, delta: Decimal) -> bool {
        delta > self.allowed(expected, actual)
    }
}

/// Outcome of one instantiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckStatus {
    /// Exact match
    Passed,
    /// Non-zero delta inside the tolerance
    WithinTolerance {
        /// Absolute difference
        delta: Decimal,
    },
    /// Delta beyond the tolerance
    Discrepancy {
        /// Absolute difference
        delta: Decimal,
    },
    /// Not evaluated
    Skipped {
        /// Why
        reason: String,
    },
}

/// One instantiated check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Anchor formula id
    pub formula_id: String,
    /// Target cell, human readable
    pub location: String,
    /// Computed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Decimal>,
    /// Reported value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Decimal>,
    /// Result
    #[serde(flatten)]
    pub status: CheckStatus,
}

/// Formula that could not be instantiated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedFormula {
    /// Anchor formula id
    pub formula_id: String,
    /// Author, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Rendered error
    pub error: String,
}

/// Verification result for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Table id
    pub table_id: String,
    /// Every instantiation, in formula then row/column order
    pub checks: Vec<CheckOutcome>,
    /// Instantiations with a non-zero delta
    pub discrepancies: Vec<Discrepancy>,
    /// Formulas rejected as authored
    pub rejected: Vec<RejectedFormula>,
}

impl VerificationReport {
    /// Discrepancies beyond tolerance
    pub fn exceeding(&self) -> impl Iterator<Item = &Discrepancy> {
        self.discrepancies.iter().filter(|d| d.tolerance_exceeded)
    }

    /// Skipped instantiations
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Skipped { .. }))
            .count()
    }

    /// Evaluated instantiations
    #[must_use]
    pub fn evaluated_count(&self) -> usize {
        self.checks.len() - self.skipped_count()
    }

    /// Findings derived from the report
    ///
    /// One `critical` per discrepancy beyond tolerance, one `warning` per
    /// rejected formula, and a single `pass` when neither occurred and at
    /// least one check was evaluated. When every check was skipped the table
    /// gets a `warning` instead: nothing was verified.
    #[must_use]
    pub fn to_findings(&self) -> Vec<Finding> {
        let mut findings: Vec<Finding> = self
            .exceeding()
            .map(|d| {
                Finding::new(
                    Severity::Critical,
                    format!("Formula {} does not hold at {}", d.formula_id, d.location),
                    format!(
                        "computed {}, reported {} (difference {})",
                        d.expected_value, d.actual_value, d.delta
                    ),
                )
                .with_subject(&self.table_id)
                .with_source(&d.location)
            })
            .collect();

        findings.extend(self.rejected.iter().map(|r| {
            let mut finding = Finding::new(
                Severity::Warning,
                format!("Anchor formula {} rejected", r.formula_id),
                r.error.clone(),
            )
            .with_subject(&self.table_id);
            if let Some(author) = &r.author {
                finding = finding.with_reasoning(format!("authored by {author}"));
            }
            finding
        }));

        if findings.is_empty() && !self.checks.is_empty() && self.evaluated_count() == 0 {
            findings.push(
                Finding::new(
                    Severity::Warning,
                    format!("Table {} could not be verified", self.table_id),
                    format!("all {} checks skipped", self.skipped_count()),
                )
                .with_subject(&self.table_id),
            );
        } else if findings.is_empty() && !self.checks.is_empty() {
            findings.push(
                Finding::new(
                    Severity::Pass,
                    format!("Table {} is internally consistent", self.table_id),
                    format!(
                        "{} checks evaluated, {} skipped",
                        self.evaluated_count(),
                        self.skipped_count()
                    ),
                )
                .with_subject(&self.table_id),
            );
        }

        findings
    }

    /// Findings plus discrepancies, ready to store
    #[must_use]
    pub fn into_finding_set(self) -> FindingSet {
        let findings = self.to_findings();
        FindingSet::new(findings).with_discrepancies(self.discrepancies)
    }
}

/// Deterministic table verifier
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    tolerance: Tolerance,
}

impl Verifier {
    /// Create with a tolerance
    #[inline]
    #[must_use]
    pub fn new(tolerance: Tolerance) -> Self {
        Self { tolerance }
    }

    /// With tolerance
    #[inline]
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Configured tolerance
    #[inline]
    #[must_use]
    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Instantiate and evaluate one formula against a grid
    ///
    /// # Errors
    /// The formula is malformed, names a row or column outside the grid, or
    /// its binding disagrees with its references.
    pub fn verify_formula(
        &self,
        grid: &TypedGrid,
        formula: &AnchorFormula,
    ) -> Result<Vec<CheckOutcome>, FormulaError> {
        let compiled = formula.compile(grid)?;
        Ok(compiled
            .indices
            .iter()
            .map(|&index| self.check(grid, formula, &compiled, index))
            .collect())
    }

    /// Verify every formula against one table
    #[must_use]
    pub fn verify_table(&self, table: &RawTable, formulas: &[AnchorFormula]) -> VerificationReport {
        let grid = TypedGrid::parse(table);
        let mut report = VerificationReport {
            table_id: grid.table_id().to_string(),
            checks: Vec::new(),
            discrepancies: Vec::new(),
            rejected: Vec::new(),
        };

        for formula in formulas {
            match self.verify_formula(&grid, formula) {
                Ok(checks) => {
                    for check in &checks {
                        if let Some(d) = self.discrepancy(&report.table_id, check) {
                            report.discrepancies.push(d);
                        }
                    }
                    report.checks.extend(checks);
                }
                Err(error) => {
                    warn!(table = %report.table_id, formula = %formula.id, %error, "anchor formula rejected");
                    report.rejected.push(RejectedFormula {
                        formula_id: formula.id.clone(),
                        author: formula.author.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        debug!(
            table = %report.table_id,
            checks = report.checks.len(),
            discrepancies = report.discrepancies.len(),
            rejected = report.rejected.len(),
            "table verified"
        );
        report
    }

    fn discrepancy(&self, table_id: &str, check: &CheckOutcome) -> Option<Discrepancy> {
        let (delta, tolerance_exceeded) = match check.status {
            CheckStatus::WithinTolerance { delta } => (delta, false),
            CheckStatus::Discrepancy { delta } => (delta, true),
            CheckStatus::Passed | CheckStatus::Skipped { .. } => return None,
        };
        Some(Discrepancy {
            formula_id: check.formula_id.clone(),
            table_id: table_id.to_string(),
            location: check.location.clone(),
            expected_value: check.expected?,
            actual_value: check.actual?,
            delta,
            tolerance_exceeded,
        })
    }

    fn check(&self, grid: &TypedGrid, formula: &AnchorFormula, compiled: &Compiled, index: usize) -> CheckOutcome {
        let target = Instance {
            grid,
            axis: compiled.axis,
            index,
        };
        let location = match target.coordinates(&compiled.formula.target) {
            Some((row, column)) => grid.describe(row, column),
            None => compiled.formula.target.to_string(),
        };
        let outcome = |expected, actual, status| CheckOutcome {
            formula_id: formula.id.clone(),
            location: location.clone(),
            expected,
            actual,
            status,
        };

        let actual = match target.value(&compiled.formula.target) {
            Ok(v) => v,
            Err(reason) => return outcome(None, None, CheckStatus::Skipped { reason }),
        };
        let expected = match target.eval(&compiled.formula.expr) {
            Ok(v) => v.normalize(),
            Err(reason) => return outcome(None, Some(actual), CheckStatus::Skipped { reason }),
        };

        let delta = (expected - actual).abs().normalize();
        let status = if delta.is_zero() {
            CheckStatus::Passed
        } else if self.tolerance.is_exceeded(expected, actual, delta) {
            CheckStatus::Discrepancy { delta }
        } else {
            CheckStatus::WithinTolerance { delta }
        };
        outcome(Some(expected), Some(actual), status)
    }
}

/// One formula bound to one row (row-wise) or column (column-wise)
struct Instance<'a> {
    grid: &'a TypedGrid,
    axis: Axis,
    index: usize,
}

type Eval = Result<Decimal, String>;

fn shift(base: usize, offset: i64) -> Option<usize> {
    let shifted = i64::try_from(base).ok()?.checked_add(offset)?;
    usize::try_from(shifted).ok()
}

impl Instance<'_> {
    fn coordinates(&self, reference: &RefTemplate) -> Option<(usize, usize)> {
        let (row, column) = match (reference, self.axis) {
            (RefTemplate::Column { column, row_offset }, Axis::Rows) => (shift(self.index, *row_offset)?, *column),
            (
                RefTemplate::Row {
                    row: RowAnchor::Number(row),
                    column_offset,
                },
                Axis::Columns,
            ) => (*row, shift(self.index, *column_offset)?),
            _ => return None,
        };
        (row < self.grid.row_count() && column < self.grid.column_count()).then_some((row, column))
    }

    fn value(&self, reference: &RefTemplate) -> Eval {
        let (row, column) = self
            .coordinates(reference)
            .ok_or_else(|| format!("{reference} falls outside the table"))?;
        match self.grid.cell(row, column) {
            Some(CellValue::Number(n)) => Ok(*n),
            Some(CellValue::Text(_)) => Err(format!("{} is not numeric", self.grid.describe(row, column))),
            _ => Err(format!("{} is empty", self.grid.describe(row, column))),
        }
    }

    fn sum(&self, from: &RefTemplate, to: &RefTemplate) -> Eval {
        let (r0, c0) = self
            .coordinates(from)
            .ok_or_else(|| format!("{from} falls outside the table"))?;
        let (r1, c1) = self
            .coordinates(to)
            .ok_or_else(|| format!("{to} falls outside the table"))?;

        let cells: Vec<(usize, usize)> = match self.axis {
            Axis::Rows => (c0.min(c1)..=c0.max(c1)).map(|c| (r0, c)).collect(),
            Axis::Columns => (r0.min(r1)..=r0.max(r1)).map(|r| (r, c0)).collect(),
        };

        // blanks are excluded; text inside the range means a bad anchor
        let mut total = Decimal::ZERO;
        let mut seen = 0usize;
        for (row, column) in cells {
            match self.grid.cell(row, column) {
                Some(CellValue::Number(n)) => {
                    total = total.checked_add(*n).ok_or("arithmetic overflow")?;
                    seen += 1;
                }
                Some(CellValue::Text(_)) => {
                    return Err(format!("{} is not numeric", self.grid.describe(row, column)));
                }
                _ => {}
            }
        }
        if seen == 0 {
            return Err(format!("SUM({from}:{to}) has no numeric cells"));
        }
        Ok(total)
    }

    fn eval(&self, expr: &Expr) -> Eval {
        match expr {
            Expr::Number(n) => Ok(*n),
            Expr::Ref(r) => self.value(r),
            Expr::Sum(a, b) => self.sum(a, b),
            Expr::Neg(inner) => Ok(-self.eval(inner)?),
            Expr::Binary(lhs, op, rhs) => {
                let (l, r) = (self.eval(lhs)?, self.eval(rhs)?);
                let result = match op {
                    Op::Add => l.checked_add(r),
                    Op::Sub => l.checked_sub(r),
                    Op::Mul => l.checked_mul(r),
                    Op::Div if r.is_zero() => return Err("division by zero".into()),
                    Op::Div => l.checked_div(r),
                };
                result.ok_or_else(|| "arithmetic overflow".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn mismatched_row_yields_one_discrepancy() {
        let table = RawTable::new("t1", vec![vec!["100", "50", "140"]]);
        let report = Verifier::default().verify_table(&table, &[AnchorFormula::new("f1", "C = A + B")]);

        assert_eq!(report.discrepancies.len(), 1);
        let d = &report.discrepancies[0];
        assert_eq!(d.expected_value, dec("150"));
        assert_eq!(d.actual_value, dec("140"));
        assert_eq!(d.delta, dec("10"));
        assert!(d.tolerance_exceeded);
        assert_eq!(d.location, "C1");

        let findings = report.to_findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn null_row_is_skipped_not_passed() {
        let table = RawTable::new(
            "t",
            vec![vec!["a", "100", "50", "150"], vec!["b", "-", "50", "50"]],
        );
        let report = Verifier::default().verify_table(&table, &[AnchorFormula::new("f", "D = B + C")]);

        assert_eq!(report.checks.len(), 2);
        assert_eq!(report.checks[0].status, CheckStatus::Passed);
        assert!(matches!(report.checks[1].status, CheckStatus::Skipped { .. }));
        assert!(report.discrepancies.is_empty());
        assert_eq!(report.skipped_count(), 1);
    }

    #[test]
    fn fully_skipped_table_is_not_reported_consistent() {
        let table = RawTable::new(
            "t",
            vec![vec!["a", "-", "50", "50"], vec!["b", "-", "5", "5"]],
        );
        let report = Verifier::default().verify_table(&table, &[AnchorFormula::new("f", "D = B + C")]);

        assert_eq!(report.evaluated_count(), 0);
        assert_eq!(report.skipped_count(), 2);
        let findings = report.to_findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].summary, "Table t could not be verified");
    }

    #[test]
    fn text_inside_a_sum_range_is_skipped() {
        let table = RawTable::new("t", vec![vec!["x", "100", "n/a", "50", "150"]]);
        let report = Verifier::default().verify_table(&table, &[AnchorFormula::new("f", "E = SUM(B:D)")]);

        assert_eq!(
            report.checks[0].status,
            CheckStatus::Skipped {
                reason: "C1 (x) is not numeric".into()
            }
        );
        assert!(report.discrepancies.is_empty());
    }

    #[test]
    fn blanks_inside_a_sum_range_are_excluded() {
        let table = RawTable::new("t", vec![vec!["x", "100", "-", "50", "150"]]);
        let report = Verifier::default().verify_table(&table, &[AnchorFormula::new("f", "E = SUM(B:D)")]);
        assert_eq!(report.checks[0].status, CheckStatus::Passed);
    }

    #[test]
    fn null_total_is_skipped_not_zero() {
        let table = RawTable::new(
            "t",
            vec![
                vec!["", "2024"],
                vec!["Product", "100"],
                vec!["Services", "50"],
                vec!["Total", ""],
            ],
        );
        let report = Verifier::default().verify_table(&table, &[AnchorFormula::new("tot", "{Total} = SUM(#2:#3)")]);
        assert_eq!(report.checks.len(), 1);
        assert!(matches!(report.checks[0].status, CheckStatus::Skipped { .. }));
        assert!(report.discrepancies.is_empty());
    }

    #[test]
    fn rounding_within_tolerance_is_recorded_but_not_exceeded() {
        let table = RawTable::new("t", vec![vec!["33.3", "33.3", "33.3", "100"]]);
        let report = Verifier::default().verify_table(&table, &[AnchorFormula::new("f", "D = SUM(A:C)")]);

        assert_eq!(report.discrepancies.len(), 1);
        assert!(!report.discrepancies[0].tolerance_exceeded);
        assert_eq!(report.exceeding().count(), 0);
        assert_eq!(report.to_findings()[0].severity, Severity::Pass);
    }

    #[test]
    fn tolerance_takes_smaller_allowance() {
        let tol = Tolerance::default();
        assert_eq!(tol.allowed(dec("10"), dec("10")), dec("0.05"));
        assert_eq!(tol.allowed(dec("1000"), dec("999")), dec("0.5"));
        assert!(tol.is_exceeded(dec("10"), dec("10.1"), dec("0.1")));
        assert!(!tol.is_exceeded(dec("1000"), dec("999.6"), dec("0.4")));
    }

    #[test]
    fn out_of_bounds_formula_is_rejected_with_author() {
        let table = RawTable::new("t", vec![vec!["1", "2", "3"]]);
        let formula = AnchorFormula::new("f9", "E = A + B").with_author("numeric.anchor");
        let report = Verifier::default().verify_table(&table, &[formula]);

        assert!(report.checks.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].author.as_deref(), Some("numeric.anchor"));
        assert_eq!(report.to_findings()[0].severity, Severity::Warning);
    }

    #[test]
    fn division_by_zero_is_skipped() {
        let table = RawTable::new("t", vec![vec!["10", "0", "5"]]);
        let report = Verifier::default().verify_table(&table, &[AnchorFormula::new("f", "C = A / B")]);
        assert_eq!(
            report.checks[0].status,
            CheckStatus::Skipped {
                reason: "division by zero".into()
            }
        );
    }

    #[test]
    fn row_offset_rolls_forward_balances() {
        let table = RawTable::new(
            "roll",
            vec![
                vec!["Opening", "Change", "Closing"],
                vec!["100", "10", "110"],
                vec!["110", "5", "116"],
            ],
        );
        let report = Verifier::default().verify_table(
            &table,
            &[
                AnchorFormula::new("close", "C = A + B"),
                AnchorFormula::new("open", "A = C[-1]"),
            ],
        );
        let statuses: Vec<_> = report.checks.iter().map(|c| (c.formula_id.as_str(), c.location.as_str())).collect();
        assert_eq!(statuses, vec![("close", "C2"), ("close", "C3"), ("open", "A2"), ("open", "A3")]);
        assert_eq!(report.exceeding().count(), 1);
        assert!(matches!(report.checks[2].status, CheckStatus::Skipped { .. }));
        assert_eq!(report.checks[3].status, CheckStatus::Passed);
    }

    proptest! {
        #[test]
        fn rerun_is_byte_identical(
            rows in prop::collection::vec((0i64..10_000, 0i64..10_000, -50i64..50), 1..12)
        ) {
            let raw: Vec<Vec<String>> = rows
                .iter()
                .map(|(a, b, noise)| vec![a.to_string(), b.to_string(), (a + b + noise).to_string()])
                .collect();
            let table = RawTable::new("p", raw);
            let formulas = [AnchorFormula::new("sum", "C = A + B")];
            let verifier = Verifier::default();

            let first = serde_json::to_string(&verifier.verify_table(&table, &formulas)).unwrap();
            let second = serde_json::to_string(&verifier.verify_table(&table, &formulas)).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn consistent_rows_never_exceed(
            rows in prop::collection::vec((-10_000i64..10_000, -10_000i64..10_000), 1..12)
        ) {
            let raw: Vec<Vec<String>> = rows
                .iter()
                .map(|(a, b)| vec![a.to_string(), b.to_string(), (a + b).to_string()])
                .collect();
            let report = Verifier::default()
                .verify_table(&RawTable::new("p", raw), &[AnchorFormula::new("sum", "C = A + B")]);
            prop_assert_eq!(report.exceeding().count(), 0);
            prop_assert!(report.discrepancies.is_empty());
        }
    }
}
