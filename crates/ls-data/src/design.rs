//! Model terms and dense design matrices.
//!
//! A [`ModelSpec`] is a deliberately small formula layer: a response plus a
//! list of terms (numeric covariates, factors, and two- or three-way
//! interactions). [`ModelSpec::build_design`] materializes a dense row-major
//! design matrix over the complete cases of a [`LongFrame`], using treatment
//! coding (first level = reference) for factors and elementwise products for
//! interaction columns.
//!
//! The design keeps a per-term record of its column range and components, so
//! downstream code can run joint tests on a term block and build linear
//! predictor rows for arbitrary reference-grid points (the basis for
//! estimated marginal means).

use std::collections::HashMap;
use std::ops::Range;

use ls_core::{Error, Result};

use crate::frame::{Column, LongFrame};

/// One model term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// A numeric covariate, one column.
    Numeric(String),
    /// A factor, expanded to `k-1` treatment-coded dummy columns.
    Factor(String),
    /// An interaction of two or three variables (numeric or factor);
    /// columns are elementwise products of the component columns.
    Interaction(Vec<String>),
}

impl Term {
    /// Term label, component names joined with `:`.
    pub fn label(&self) -> String {
        match self {
            Term::Numeric(n) | Term::Factor(n) => n.clone(),
            Term::Interaction(vs) => vs.join(":"),
        }
    }

    /// Variable names referenced by this term.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Numeric(n) | Term::Factor(n) => vec![n.as_str()],
            Term::Interaction(vs) => vs.iter().map(|v| v.as_str()).collect(),
        }
    }
}

/// A value assigned to a variable when building a reference-grid row.
#[derive(Debug, Clone, PartialEq)]
pub enum GridValue {
    /// Pin a factor to one of its levels.
    Level(String),
    /// Pin a numeric covariate to a value.
    Value(f64),
}

#[derive(Debug, Clone)]
enum Component {
    Numeric { name: String, mean: f64 },
    Factor { name: String, levels: Vec<String> },
}

impl Component {
    fn name(&self) -> &str {
        match self {
            Component::Numeric { name, .. } | Component::Factor { name, .. } => name,
        }
    }

    /// Column-space values of this component at a grid point.
    ///
    /// Unassigned numerics sit at their design mean; unassigned factors are
    /// averaged over their levels with equal weight.
    fn grid_values(&self, assign: &HashMap<String, GridValue>) -> Result<Vec<f64>> {
        match self {
            Component::Numeric { name, mean } => match assign.get(name) {
                Some(GridValue::Value(x)) => Ok(vec![*x]),
                Some(GridValue::Level(_)) => Err(Error::Validation(format!(
                    "'{name}' is numeric, cannot assign a level"
                ))),
                None => Ok(vec![*mean]),
            },
            Component::Factor { name, levels } => {
                let k = levels.len();
                match assign.get(name) {
                    Some(GridValue::Level(l)) => {
                        let idx = levels.iter().position(|lv| lv == l).ok_or_else(|| {
                            Error::Validation(format!("'{l}' is not a level of '{name}'"))
                        })?;
                        Ok((1..k).map(|j| if j == idx { 1.0 } else { 0.0 }).collect())
                    }
                    Some(GridValue::Value(_)) => Err(Error::Validation(format!(
                        "'{name}' is a factor, cannot assign a numeric value"
                    ))),
                    None => Ok(vec![1.0 / k as f64; k - 1]),
                }
            }
        }
    }
}

/// Columns and components of one built term.
#[derive(Debug, Clone)]
pub struct TermColumns {
    label: String,
    cols: Range<usize>,
    components: Vec<Component>,
}

impl TermColumns {
    /// Term label (component names joined with `:`).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Column range of this term within the design matrix.
    pub fn columns(&self) -> Range<usize> {
        self.cols.clone()
    }

    /// Names of the variables this term is built from.
    pub fn variable_names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    /// Values of this term's columns at a reference-grid point.
    pub fn grid_values(&self, assign: &HashMap<String, GridValue>) -> Result<Vec<f64>> {
        let mut acc = vec![1.0];
        for comp in &self.components {
            let vals = comp.grid_values(assign)?;
            let mut next = Vec::with_capacity(acc.len() * vals.len());
            for &a in &acc {
                for &v in &vals {
                    next.push(a * v);
                }
            }
            acc = next;
        }
        Ok(acc)
    }
}

/// Response + terms; builds design matrices.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    response: String,
    terms: Vec<Term>,
    include_intercept: bool,
}

impl ModelSpec {
    /// Start a spec for the given response column (intercept included).
    pub fn new(response: &str) -> Self {
        Self { response: response.to_string(), terms: Vec::new(), include_intercept: true }
    }

    /// Add a numeric covariate term.
    pub fn numeric(mut self, name: &str) -> Self {
        self.terms.push(Term::Numeric(name.to_string()));
        self
    }

    /// Add a factor term.
    pub fn factor(mut self, name: &str) -> Self {
        self.terms.push(Term::Factor(name.to_string()));
        self
    }

    /// Add an interaction term over the named variables.
    pub fn interaction(mut self, names: &[&str]) -> Self {
        self.terms.push(Term::Interaction(names.iter().map(|n| (*n).to_string()).collect()));
        self
    }

    /// Add an arbitrary term.
    pub fn term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    /// Drop the intercept column.
    pub fn without_intercept(mut self) -> Self {
        self.include_intercept = false;
        self
    }

    /// Response column name.
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Terms in declaration order.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    fn validate(&self) -> Result<()> {
        if self.terms.is_empty() {
            return Err(Error::Validation("model spec has no terms".to_string()));
        }
        for term in &self.terms {
            if let Term::Interaction(vs) = term {
                if vs.len() < 2 || vs.len() > 3 {
                    return Err(Error::Validation(format!(
                        "interaction '{}' must have 2 or 3 components",
                        term.label()
                    )));
                }
                for (i, v) in vs.iter().enumerate() {
                    if vs[..i].contains(v) {
                        return Err(Error::Validation(format!(
                            "interaction '{}' repeats '{}'",
                            term.label(),
                            v
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Build the dense design matrix over the complete cases of `frame`.
    pub fn build_design(&self, frame: &LongFrame) -> Result<Design> {
        self.validate()?;

        // Complete cases: response and every term variable present.
        let mut vars: Vec<&str> = vec![self.response.as_str()];
        for term in &self.terms {
            for v in term.variables() {
                if !vars.contains(&v) {
                    vars.push(v);
                }
            }
        }
        frame.numeric(&self.response)?;
        let rows = frame.complete_rows(&vars)?;
        if rows.is_empty() {
            return Err(Error::Validation("no complete cases for model spec".to_string()));
        }
        let n = rows.len();

        let y: Vec<f64> = {
            let col = frame.numeric(&self.response)?;
            rows.iter()
                .map(|&r| col[r].ok_or_else(|| Error::Computation("lost response value".into())))
                .collect::<Result<_>>()?
        };

        // Per-term column blocks.
        let mut col_blocks: Vec<Vec<f64>> = Vec::new(); // column-major blocks
        let mut names: Vec<String> = Vec::new();
        let mut terms: Vec<TermColumns> = Vec::new();

        for term in &self.terms {
            let mut components = Vec::new();
            // (values per kept row, name) per component column
            let mut acc_cols: Vec<Vec<f64>> = vec![vec![1.0; n]];
            let mut acc_names: Vec<String> = vec![String::new()];

            for var in term.variables() {
                let (comp, comp_cols, comp_names) = component_columns(frame, var, &rows)?;
                components.push(comp);
                let mut next_cols = Vec::with_capacity(acc_cols.len() * comp_cols.len());
                let mut next_names = Vec::with_capacity(acc_names.len() * comp_names.len());
                for (a_col, a_name) in acc_cols.iter().zip(&acc_names) {
                    for (c_col, c_name) in comp_cols.iter().zip(&comp_names) {
                        let col: Vec<f64> =
                            a_col.iter().zip(c_col).map(|(&a, &c)| a * c).collect();
                        next_cols.push(col);
                        let name = if a_name.is_empty() {
                            c_name.clone()
                        } else {
                            format!("{a_name}:{c_name}")
                        };
                        next_names.push(name);
                    }
                }
                acc_cols = next_cols;
                acc_names = next_names;
            }

            let start = names.len();
            names.extend(acc_names);
            col_blocks.extend(acc_cols);
            terms.push(TermColumns { label: term.label(), cols: start..names.len(), components });
        }

        let p = names.len();
        let mut x = vec![0.0; n * p];
        for (j, col) in col_blocks.iter().enumerate() {
            for (i, &v) in col.iter().enumerate() {
                x[i * p + j] = v;
            }
        }

        // Dense subject codes over the kept rows.
        let mut map: HashMap<u64, usize> = HashMap::new();
        let mut group_codes = Vec::with_capacity(n);
        for &r in &rows {
            let sid = frame.subjects()[r];
            let next = map.len();
            group_codes.push(*map.entry(sid).or_insert(next));
        }
        let n_groups = map.len();

        Ok(Design {
            x,
            y,
            n,
            p,
            names,
            include_intercept: self.include_intercept,
            terms,
            rows,
            group_codes,
            n_groups,
            response: self.response.clone(),
        })
    }
}

/// Materialize one component's columns over the kept rows.
fn component_columns(
    frame: &LongFrame,
    var: &str,
    rows: &[usize],
) -> Result<(Component, Vec<Vec<f64>>, Vec<String>)> {
    match frame.column(var) {
        Some(Column::Numeric(values)) => {
            let col: Vec<f64> = rows
                .iter()
                .map(|&r| {
                    values[r].ok_or_else(|| Error::Computation("lost covariate value".into()))
                })
                .collect::<Result<_>>()?;
            let mean = col.iter().sum::<f64>() / col.len() as f64;
            Ok((
                Component::Numeric { name: var.to_string(), mean },
                vec![col],
                vec![var.to_string()],
            ))
        }
        Some(Column::Factor(f)) => {
            let k = f.n_levels();
            if k < 2 {
                return Err(Error::Validation(format!(
                    "factor '{var}' needs at least 2 levels, has {k}"
                )));
            }
            let mut cols = Vec::with_capacity(k - 1);
            let mut names = Vec::with_capacity(k - 1);
            for level in 1..k {
                let col: Vec<f64> = rows
                    .iter()
                    .map(|&r| {
                        let code = f
                            .code(r)
                            .ok_or_else(|| Error::Computation("lost factor code".into()))?;
                        Ok(if code == level { 1.0 } else { 0.0 })
                    })
                    .collect::<Result<_>>()?;
                cols.push(col);
                names.push(format!("{var}[{}]", f.levels()[level]));
            }
            Ok((
                Component::Factor { name: var.to_string(), levels: f.levels().to_vec() },
                cols,
                names,
            ))
        }
        None => Err(Error::Validation(format!("no column named '{var}'"))),
    }
}

/// Dense design matrix over complete cases, with per-term column metadata.
#[derive(Debug, Clone)]
pub struct Design {
    x: Vec<f64>,
    y: Vec<f64>,
    n: usize,
    p: usize,
    names: Vec<String>,
    include_intercept: bool,
    terms: Vec<TermColumns>,
    rows: Vec<usize>,
    group_codes: Vec<usize>,
    n_groups: usize,
    response: String,
}

impl Design {
    /// Row-major `n × p` matrix (intercept not included as a column).
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Response values over the kept rows.
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Number of kept (complete-case) rows.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of design columns (excluding intercept).
    pub fn p(&self) -> usize {
        self.p
    }

    /// Design column names (excluding intercept).
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// `true` when the model carries an intercept.
    pub fn include_intercept(&self) -> bool {
        self.include_intercept
    }

    /// Number of fixed-effect coefficients (intercept included).
    pub fn n_fixed(&self) -> usize {
        self.p + usize::from(self.include_intercept)
    }

    /// Fixed-effect coefficient names, `(Intercept)` first when present.
    pub fn fixed_names(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.n_fixed());
        if self.include_intercept {
            out.push("(Intercept)".to_string());
        }
        out.extend(self.names.iter().cloned());
        out
    }

    /// Per-term column metadata, in declaration order.
    pub fn terms(&self) -> &[TermColumns] {
        &self.terms
    }

    /// Term lookup by label.
    pub fn term(&self, label: &str) -> Option<&TermColumns> {
        self.terms.iter().find(|t| t.label() == label)
    }

    /// Interaction term over exactly this variable set, in any order.
    pub fn interaction_term(&self, vars: &[&str]) -> Option<&TermColumns> {
        self.terms.iter().find(|t| {
            let names = t.variable_names();
            names.len() == vars.len()
                && names.len() > 1
                && vars.iter().all(|v| names.contains(v))
        })
    }

    /// Original frame row index per kept row.
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    /// Dense 0-based subject code per kept row.
    pub fn group_codes(&self) -> &[usize] {
        &self.group_codes
    }

    /// Number of distinct subjects among kept rows.
    pub fn n_groups(&self) -> usize {
        self.n_groups
    }

    /// Response column name.
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Levels of a factor variable appearing in the design, if any.
    pub fn factor_levels(&self, name: &str) -> Option<&[String]> {
        for term in &self.terms {
            for comp in &term.components {
                if let Component::Factor { name: n, levels } = comp
                    && n == name
                {
                    return Some(levels);
                }
            }
        }
        None
    }

    /// Design-column values (length `p`) at a reference-grid point.
    pub fn linear_row(&self, assign: &HashMap<String, GridValue>) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(self.p);
        for term in &self.terms {
            out.extend(term.grid_values(assign)?);
        }
        debug_assert_eq!(out.len(), self.p);
        Ok(out)
    }

    /// Fixed-effect row (length `n_fixed`) at a grid point, intercept first.
    pub fn fixed_row(&self, assign: &HashMap<String, GridValue>) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(self.n_fixed());
        if self.include_intercept {
            out.push(1.0);
        }
        out.extend(self.linear_row(assign)?);
        Ok(out)
    }

    /// Column index (into `x`) of a design column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}
