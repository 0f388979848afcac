//! Two-phase simplex with lexicographic anti-cycling.
//!
//! Programs are `max` (or `min`) `c·x` subject to `A x <= b`, `x >= 0`.
//!
//! The tableau has one row per constraint plus the objective row, and columns laid out
//! as `[originals | slacks | delta | constant | perturbations]`:
//!
//! - `delta` is the Phase I artificial variable, subtracted from every constraint so a
//!   single pivot makes an infeasible origin feasible.
//! - The perturbation block starts as the identity and tracks the basis inverse. Ties in
//!   the ratio test are broken lexicographically on `(constant, perturbations...)`, which
//!   rules out cycling.
//! - The objective row holds reduced costs with `-z` in the constant column.

use tracing::{debug, trace};

use crate::error::ensure_len;
use crate::{Error, Matrix, Result};

/// Smallest coefficient treated as non-zero by pivot selection and the Phase I test.
const TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sense {
    Maximize,
    Minimize,
}

/// Terminal state of a solve.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Optimal { value: f64, parameters: Vec<f64> },
    Infeasible,
    Unbounded,
}

#[derive(Debug, Clone)]
pub struct Simplex {
    variables: usize,
    /// `variables` coefficients followed by the right-hand side of a `<=` row.
    constraints: Vec<Vec<f64>>,
    objective: Option<(Sense, Vec<f64>)>,
    outcome: Option<Outcome>,
}

impl Simplex {
    pub fn new(variables: usize) -> Result<Self> {
        if variables == 0 {
            return Err(Error::InvalidConfig(
                "a linear program needs at least one variable".to_owned(),
            ));
        }
        Ok(Self {
            variables,
            constraints: Vec::new(),
            objective: None,
            outcome: None,
        })
    }

    #[inline]
    pub fn variables(&self) -> usize {
        self.variables
    }

    #[inline]
    pub fn constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Add `a·x <= b`, given as `[a_0, .., a_{n-1}, b]`.
    pub fn subject_to(&mut self, row: &[f64]) -> Result<()> {
        ensure_len(row.len(), self.variables + 1, "constraint")?;
        if row.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "constraint coefficients must be finite".to_owned(),
            ));
        }
        self.constraints.push(row.to_vec());
        self.outcome = None;
        Ok(())
    }

    /// Add `a·x >= b`.
    pub fn subject_to_ge(&mut self, row: &[f64]) -> Result<()> {
        let negated: Vec<f64> = row.iter().map(|v| -v).collect();
        self.subject_to(&negated)
    }

    /// Add `a·x == b` as a pair of inequalities.
    pub fn subject_to_eq(&mut self, row: &[f64]) -> Result<()> {
        self.subject_to(row)?;
        self.subject_to_ge(row)
    }

    pub fn maximize(&mut self, c: &[f64]) -> Result<()> {
        self.set_objective(Sense::Maximize, c)
    }

    pub fn minimize(&mut self, c: &[f64]) -> Result<()> {
        self.set_objective(Sense::Minimize, c)
    }

    fn set_objective(&mut self, sense: Sense, c: &[f64]) -> Result<()> {
        ensure_len(c.len(), self.variables, "objective")?;
        if c.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "objective coefficients must be finite".to_owned(),
            ));
        }
        self.objective = Some((sense, c.to_vec()));
        self.outcome = None;
        Ok(())
    }

    /// Run both phases. Returns `true` when an optimum was found.
    pub fn solve(&mut self) -> Result<bool> {
        let Some((sense, c)) = &self.objective else {
            return Err(Error::InvalidConfig(
                "set an objective with maximize or minimize before solving".to_owned(),
            ));
        };

        let mut tableau = Tableau::new(self.variables, &self.constraints);
        let outcome = tableau.solve(*sense, c);
        let solved = matches!(outcome, Outcome::Optimal { .. });
        self.outcome = Some(outcome);
        Ok(solved)
    }

    /// Terminal state of the last solve, if any.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn is_infeasible(&self) -> Result<bool> {
        Ok(matches!(self.solved()?, Outcome::Infeasible))
    }

    pub fn is_unbounded(&self) -> Result<bool> {
        Ok(matches!(self.solved()?, Outcome::Unbounded))
    }

    /// Optimal objective value.
    pub fn value(&self) -> Result<f64> {
        match self.solved()? {
            Outcome::Optimal { value, .. } => Ok(*value),
            other => Err(not_optimal(other)),
        }
    }

    /// Optimal assignment of the original variables.
    pub fn parameters(&self) -> Result<&[f64]> {
        match self.solved()? {
            Outcome::Optimal { parameters, .. } => Ok(parameters),
            other => Err(not_optimal(other)),
        }
    }

    fn solved(&self) -> Result<&Outcome> {
        self.outcome
            .as_ref()
            .ok_or_else(|| Error::NotSolved("call solve() first".to_owned()))
    }
}

fn not_optimal(outcome: &Outcome) -> Error {
    let what = match outcome {
        Outcome::Infeasible => "infeasible",
        Outcome::Unbounded => "unbounded",
        Outcome::Optimal { .. } => "optimal",
    };
    Error::NotSolved(format!("program is {what}"))
}

struct Tableau {
    n: usize,
    m: usize,
    t: Matrix,
    /// Basic variable of each constraint row.
    basis: Vec<usize>,
    pivots: usize,
}

enum Phase {
    Optimal,
    Unbounded,
}

impl Tableau {
    fn new(n: usize, constraints: &[Vec<f64>]) -> Self {
        let m = constraints.len();
        let width = n + m + 2 + m;
        let mut t = Matrix::zeros(m + 1, width);
        let mut basis = Vec::with_capacity(m);

        for (i, row) in constraints.iter().enumerate() {
            let out = t.row_mut(i);
            out[..n].copy_from_slice(&row[..n]);
            out[n + i] = 1.0;
            out[n + m] = -1.0;
            out[n + m + 1] = row[n];
            out[n + m + 2 + i] = 1.0;
            basis.push(n + i);
        }

        Self {
            n,
            m,
            t,
            basis,
            pivots: 0,
        }
    }

    #[inline]
    fn delta(&self) -> usize {
        self.n + self.m
    }

    #[inline]
    fn constant(&self) -> usize {
        self.n + self.m + 1
    }

    #[inline]
    fn objective_row(&self) -> usize {
        self.m
    }

    fn solve(&mut self, sense: Sense, c: &[f64]) -> Outcome {
        if !self.phase_one() {
            debug!(pivots = self.pivots, "linear program is infeasible");
            return Outcome::Infeasible;
        }

        // Phase II: load the objective and price out the basis.
        let obj = self.objective_row();
        let delta = self.delta();
        self.t.row_mut(obj).fill(0.0);
        for (j, &cj) in c.iter().enumerate() {
            self.t[(obj, j)] = match sense {
                Sense::Maximize => cj,
                Sense::Minimize => -cj,
            };
        }
        for i in 0..self.m {
            let factor = self.t[(obj, self.basis[i])];
            if factor != 0.0 {
                self.subtract_row(obj, i, factor);
            }
        }

        match self.run(delta) {
            Phase::Unbounded => {
                debug!(pivots = self.pivots, "linear program is unbounded");
                Outcome::Unbounded
            }
            Phase::Optimal => {
                let entry = self.t[(obj, self.constant())];
                let value = match sense {
                    Sense::Maximize => -entry,
                    Sense::Minimize => entry,
                };
                let mut parameters = vec![0.0; self.n];
                for (i, &b) in self.basis.iter().enumerate() {
                    if b < self.n {
                        parameters[b] = self.t[(i, self.constant())];
                    }
                }
                debug!(pivots = self.pivots, value, "linear program solved");
                Outcome::Optimal { value, parameters }
            }
        }
    }

    /// Drive `delta` to zero. Returns `false` if the constraints are infeasible.
    fn phase_one(&mut self) -> bool {
        let constant = self.constant();
        let delta = self.delta();
        let obj = self.objective_row();

        let worst = (0..self.m)
            .filter(|&i| self.t[(i, constant)] < 0.0)
            .min_by(|&a, &b| self.t[(a, constant)].total_cmp(&self.t[(b, constant)]));

        if let Some(row) = worst {
            // maximize -delta
            self.t[(obj, delta)] = -1.0;
            self.pivot(row, delta);
            if let Phase::Unbounded = self.run(constant) {
                // -delta is bounded above by zero; treat as numerical trouble.
                return false;
            }
            if self.t[(obj, constant)].abs() > TOLERANCE {
                return false;
            }

            if let Some(row) = self.basis.iter().position(|&b| b == delta) {
                let replacement = (0..delta).find(|&j| self.t[(row, j)].abs() > TOLERANCE);
                if let Some(col) = replacement {
                    self.pivot(row, col);
                }
            }
        }

        for i in 0..=self.m {
            self.t[(i, delta)] = 0.0;
        }
        true
    }

    /// Pivot until no column below `limit` has a positive reduced cost.
    fn run(&mut self, limit: usize) -> Phase {
        let obj = self.objective_row();
        loop {
            let mut enter: Option<(usize, f64)> = None;
            for j in 0..limit {
                let v = self.t[(obj, j)];
                if v > TOLERANCE && enter.is_none_or(|(_, best)| v > best) {
                    enter = Some((j, v));
                }
            }
            let Some((col, _)) = enter else {
                return Phase::Optimal;
            };

            let Some(row) = self.leaving_row(col) else {
                return Phase::Unbounded;
            };
            self.pivot(row, col);
        }
    }

    /// Lexicographically smallest `(constant, perturbations...) / coeff` over rows with
    /// a positive entry in `col`.
    fn leaving_row(&self, col: usize) -> Option<usize> {
        let constant = self.constant();
        let width = self.t.cols();
        let mut best: Option<usize> = None;
        for i in 0..self.m {
            let a = self.t[(i, col)];
            if a <= TOLERANCE {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    let ab = self.t[(b, col)];
                    let mut ordering = std::cmp::Ordering::Equal;
                    for k in constant..width {
                        ordering = (self.t[(i, k)] / a).total_cmp(&(self.t[(b, k)] / ab));
                        if ordering.is_ne() {
                            break;
                        }
                    }
                    ordering.is_lt()
                }
            };
            if better {
                best = Some(i);
            }
        }
        best
    }

    fn pivot(&mut self, row: usize, col: usize) {
        trace!(row, entering = col, leaving = self.basis[row], "pivot");
        let p = self.t[(row, col)];
        for v in self.t.row_mut(row) {
            *v /= p;
        }
        self.t[(row, col)] = 1.0;

        for i in 0..=self.m {
            if i == row {
                continue;
            }
            let factor = self.t[(i, col)];
            if factor != 0.0 {
                self.subtract_row(i, row, factor);
                self.t[(i, col)] = 0.0;
            }
        }
        self.basis[row] = col;
        self.pivots += 1;
    }

    /// `t[target] -= factor * t[source]`.
    fn subtract_row(&mut self, target: usize, source: usize, factor: f64) {
        let width = self.t.cols();
        for k in 0..width {
            let delta = factor * self.t[(source, k)];
            self.t[(target, k)] -= delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn textbook_maximum() {
        let mut lp = Simplex::new(2).unwrap();
        lp.subject_to(&[1.0, 2.0, 4.0]).unwrap();
        lp.subject_to(&[3.0, 2.0, 6.0]).unwrap();
        lp.maximize(&[1.0, 1.0]).unwrap();

        assert!(lp.solve().unwrap());
        assert!(close(lp.value().unwrap(), 2.5));
        let x = lp.parameters().unwrap();
        assert!(close(x[0], 1.0) && close(x[1], 1.5), "{x:?}");
        assert!(!lp.is_infeasible().unwrap());
        assert!(!lp.is_unbounded().unwrap());
    }

    #[test]
    fn polling_before_solve_is_misuse() {
        let mut lp = Simplex::new(1).unwrap();
        assert!(matches!(lp.value(), Err(Error::NotSolved(_))));
        assert!(matches!(lp.parameters(), Err(Error::NotSolved(_))));
        assert!(matches!(lp.is_infeasible(), Err(Error::NotSolved(_))));
        assert!(matches!(lp.solve(), Err(Error::InvalidConfig(_))));
        assert!(lp.subject_to(&[1.0]).is_err());
        assert!(lp.maximize(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn infeasible_program() {
        // x <= 1 and x >= 2
        let mut lp = Simplex::new(1).unwrap();
        lp.subject_to(&[1.0, 1.0]).unwrap();
        lp.subject_to_ge(&[1.0, 2.0]).unwrap();
        lp.maximize(&[1.0]).unwrap();
        assert!(!lp.solve().unwrap());
        assert!(lp.is_infeasible().unwrap());
        assert!(matches!(lp.value(), Err(Error::NotSolved(_))));
    }

    #[test]
    fn unbounded_program() {
        // x - y <= 1, maximize x + y
        let mut lp = Simplex::new(2).unwrap();
        lp.subject_to(&[1.0, -1.0, 1.0]).unwrap();
        lp.maximize(&[1.0, 1.0]).unwrap();
        assert!(!lp.solve().unwrap());
        assert!(lp.is_unbounded().unwrap());
    }

    #[test]
    fn phase_one_reaches_a_shifted_optimum() {
        // minimize x + y s.t. x + y >= 2, x - y == 1  ->  x = 1.5, y = 0.5
        let mut lp = Simplex::new(2).unwrap();
        lp.subject_to_ge(&[1.0, 1.0, 2.0]).unwrap();
        lp.subject_to_eq(&[1.0, -1.0, 1.0]).unwrap();
        lp.minimize(&[1.0, 1.0]).unwrap();
        assert!(lp.solve().unwrap());
        assert!(close(lp.value().unwrap(), 2.0));
        let x = lp.parameters().unwrap();
        assert!(close(x[0], 1.5) && close(x[1], 0.5), "{x:?}");
    }

    #[test]
    fn degenerate_program_terminates() {
        // Classic cycling example (Beale); lexicographic pivoting must terminate.
        let mut lp = Simplex::new(4).unwrap();
        lp.subject_to(&[0.25, -60.0, -0.04, 9.0, 0.0]).unwrap();
        lp.subject_to(&[0.5, -90.0, -0.02, 3.0, 0.0]).unwrap();
        lp.subject_to(&[0.0, 0.0, 1.0, 0.0, 1.0]).unwrap();
        lp.maximize(&[0.75, -150.0, 0.02, -6.0]).unwrap();
        assert!(lp.solve().unwrap());
        assert!(close(lp.value().unwrap(), 0.05));
    }

    #[test]
    fn solution_is_feasible() {
        let rows = [
            [2.0, 1.0, 1.0, 14.0],
            [4.0, 2.0, 3.0, 28.0],
            [2.0, 5.0, 5.0, 30.0],
        ];
        let mut lp = Simplex::new(3).unwrap();
        for r in &rows {
            lp.subject_to(r).unwrap();
        }
        lp.maximize(&[1.0, 2.0, -1.0]).unwrap();
        assert!(lp.solve().unwrap());
        let x = lp.parameters().unwrap().to_vec();
        for r in &rows {
            let lhs: f64 = r[..3].iter().zip(&x).map(|(a, b)| a * b).sum();
            assert!(lhs <= r[3] + 1e-9);
        }
        assert!(x.iter().all(|&v| v >= -1e-12));
        // Optimum at x = (5, 4, 0), value 13.
        assert!(close(lp.value().unwrap(), 13.0));
    }

    /// Largest violation of the tableau's constraint equations at `z`, which lists a
    /// value for every column left of the constant.
    fn row_violation(tab: &Tableau, z: &[f64]) -> f64 {
        let constant = tab.constant();
        (0..tab.m)
            .map(|i| {
                let lhs: f64 = (0..constant).map(|j| tab.t[(i, j)] * z[j]).sum();
                (lhs - tab.t[(i, constant)]).abs()
            })
            .fold(0.0, f64::max)
    }

    #[test]
    fn pivoting_preserves_the_solution_set() {
        let constraints = vec![vec![1.0, 2.0, 4.0], vec![3.0, 2.0, 6.0]];
        // (x, y, s1, s2, delta) with the slacks closing both rows.
        let closing =
            |x: f64, y: f64| vec![x, y, 4.0 - x - 2.0 * y, 6.0 - 3.0 * x - 2.0 * y, 0.0];
        let inside = [
            closing(0.0, 0.0),
            closing(1.0, 1.5),
            closing(2.0, 0.0),
            closing(-1.0, 3.0),
        ];
        let outside = [
            vec![1.0, 1.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 4.0, 6.0, 1.0],
        ];
        let check = |tab: &Tableau| {
            for z in &inside {
                assert!(row_violation(tab, z) < 1e-12, "{z:?}");
            }
            for z in &outside {
                assert!(row_violation(tab, z) > 1e-3, "{z:?}");
            }
        };

        let mut tab = Tableau::new(2, &constraints);
        let original = tab.t.clone();
        check(&tab);

        // x enters on the second row: 6 / 3 < 4 / 1.
        assert_eq!(tab.leaving_row(0), Some(1));
        tab.pivot(1, 0);
        check(&tab);
        assert_eq!(tab.basis, vec![2, 0]);

        let constant = tab.constant();
        let mut basic = vec![0.0; constant];
        for (i, &b) in tab.basis.iter().enumerate() {
            basic[b] = tab.t[(i, constant)];
        }
        for (got, want) in basic.iter().zip(&closing(2.0, 0.0)) {
            assert!(close(*got, *want), "{basic:?}");
        }
        assert!(row_violation(&tab, &basic) < 1e-12);

        // Bringing the slack back restores the starting tableau.
        tab.pivot(1, 3);
        check(&tab);
        assert_eq!(tab.basis, vec![2, 3]);
        for (got, want) in tab.t.as_slice().iter().zip(original.as_slice()) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn no_constraints() {
        let mut lp = Simplex::new(2).unwrap();
        lp.minimize(&[1.0, 2.0]).unwrap();
        assert!(lp.solve().unwrap());
        assert_eq!(lp.value().unwrap(), 0.0);
        lp.maximize(&[1.0, 0.0]).unwrap();
        assert!(lp.outcome().is_none());
        assert!(!lp.solve().unwrap());
        assert!(lp.is_unbounded().unwrap());
    }
}
