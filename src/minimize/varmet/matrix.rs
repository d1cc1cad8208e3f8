use ndarray::{Array1, Array2};

/// Symmetric matrix in packed upper-triangular storage.
///
/// Element (i, j) with `i <= j` lives at `j*(j+1)/2 + i`, so an n-by-n
/// matrix costs `n*(n+1)/2` values. This is the layout the inverse-Hessian
/// estimate is carried in throughout the variable-metric minimizer.
#[derive(Clone, Debug, PartialEq)]
pub struct PackedSym {
    n: usize,
    data: Vec<f64>,
}

impl PackedSym {
    pub fn zeros(n: usize) -> PackedSym {
        PackedSym {
            n,
            data: vec![0.0; n * (n + 1) / 2],
        }
    }

    pub fn identity(n: usize) -> PackedSym {
        let mut m = PackedSym::zeros(n);
        for i in 0..n {
            m.set(i, i, 1.0);
        }
        m
    }

    pub fn from_diagonal(diag: &Array1<f64>) -> PackedSym {
        let mut m = PackedSym::zeros(diag.len());
        for (i, &v) in diag.iter().enumerate() {
            m.set(i, i, v);
        }
        m
    }

    /// Repack a dense matrix, averaging the off-diagonal pairs so slight
    /// asymmetry from upstream arithmetic cannot accumulate.
    pub fn from_dense(a: &Array2<f64>) -> PackedSym {
        let n = a.nrows();
        let mut m = PackedSym::zeros(n);
        for j in 0..n {
            for i in 0..=j {
                m.set(i, j, 0.5 * (a[[i, j]] + a[[j, i]]));
            }
        }
        m
    }

    pub fn n(&self) -> usize {
        self.n
    }

    fn idx(i: usize, j: usize) -> usize {
        let (a, b) = if i <= j { (i, j) } else { (j, i) };
        b * (b + 1) / 2 + a
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[Self::idx(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.data[Self::idx(i, j)] = v;
    }

    pub fn add(&mut self, i: usize, j: usize, dv: f64) {
        self.data[Self::idx(i, j)] += dv;
    }

    pub fn scale(&mut self, c: f64) {
        for v in self.data.iter_mut() {
            *v *= c;
        }
    }

    pub fn to_dense(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.n, self.n), |(i, j)| self.get(i, j))
    }

    pub fn mat_vec(&self, v: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.n);
        for i in 0..self.n {
            let mut s = 0.0;
            for j in 0..self.n {
                s += self.get(i, j) * v[j];
            }
            out[i] = s;
        }
        out
    }

    /// Quadratic form `v' M v`.
    pub fn quad_form(&self, v: &Array1<f64>) -> f64 {
        let mut s = 0.0;
        for i in 0..self.n {
            for j in 0..self.n {
                s += v[i] * self.get(i, j) * v[j];
            }
        }
        s
    }

    /// Sum of absolute element differences against `other`, relative to the
    /// absolute element sum of `self`. Used to damp the convergence metric
    /// while the matrix estimate is still moving.
    pub fn relative_change(&self, other: &PackedSym) -> f64 {
        let mut num = 0.0;
        let mut den = 0.0;
        for (a, b) in self.data.iter().zip(other.data.iter()) {
            num += (a - b).abs();
            den += a.abs();
        }
        num / (den + 1e-30)
    }

    /// Invert by Gauss-Jordan elimination with partial pivoting.
    /// Returns None when the matrix is singular to working precision.
    pub fn inverse(&self) -> Option<PackedSym> {
        let n = self.n;
        let mut a = self.to_dense();
        let mut inv: Array2<f64> = Array2::eye(n);

        for col in 0..n {
            let mut piv = col;
            for r in col + 1..n {
                if a[[r, col]].abs() > a[[piv, col]].abs() {
                    piv = r;
                }
            }
            if !a[[piv, col]].is_finite() || a[[piv, col]].abs() < 1e-300 {
                return None;
            }
            if piv != col {
                for j in 0..n {
                    a.swap([piv, j], [col, j]);
                    inv.swap([piv, j], [col, j]);
                }
            }
            let d = a[[col, col]];
            for j in 0..n {
                a[[col, j]] /= d;
                inv[[col, j]] /= d;
            }
            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = a[[r, col]];
                if factor != 0.0 {
                    for j in 0..n {
                        a[[r, j]] -= factor * a[[col, j]];
                        inv[[r, j]] -= factor * inv[[col, j]];
                    }
                }
            }
        }
        Some(PackedSym::from_dense(&inv))
    }

    /// Eigenvalues in ascending order: Householder reduction to tridiagonal
    /// form followed by QL iteration with implicit shifts. Returns None if
    /// the QL sweep fails to deflate within its iteration cap.
    pub fn eigenvalues(&self) -> Option<Array1<f64>> {
        let n = self.n;
        if n == 0 {
            return Some(Array1::zeros(0));
        }
        if n == 1 {
            return Some(Array1::from(vec![self.get(0, 0)]));
        }

        let mut a = self.to_dense();
        let mut d = vec![0.0; n];
        let mut e = vec![0.0; n];
        tridiagonalize(&mut a, &mut e);
        for i in 0..n {
            d[i] = a[[i, i]];
        }
        if ql_implicit(&mut d, &mut e).is_err() {
            return None;
        }
        d.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
        Some(Array1::from(d))
    }

    /// Make the matrix safely positive-definite by adding a constant to the
    /// diagonal when the smallest eigenvalue falls at or below `eps` times
    /// the largest magnitude. Returns the constant added, or None when the
    /// matrix was already acceptable.
    pub fn force_pos_def(&mut self, eps: f64) -> Option<f64> {
        let eig = self.eigenvalues()?;
        let dgmax = eig.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
        let dgmin = eig.iter().fold(f64::INFINITY, |m, &v| m.min(v));
        if dgmin > eps * dgmax {
            return None;
        }
        let pad = (eps * dgmax - dgmin).max(eps * dgmax.max(1.0));
        for i in 0..self.n {
            self.add(i, i, pad);
        }
        Some(pad)
    }
}

/// Householder reduction of a symmetric matrix to tridiagonal form; the
/// diagonal ends up on `a`'s diagonal and the subdiagonal in `e[1..]`.
fn tridiagonalize(a: &mut Array2<f64>, e: &mut [f64]) {
    let n = a.nrows();
    for i in (1..n).rev() {
        let l = i - 1;
        let mut h = 0.0;
        if l > 0 {
            let mut scale = 0.0;
            for k in 0..=l {
                scale += a[[i, k]].abs();
            }
            if scale == 0.0 {
                e[i] = a[[i, l]];
            } else {
                for k in 0..=l {
                    a[[i, k]] /= scale;
                    h += a[[i, k]] * a[[i, k]];
                }
                let mut f = a[[i, l]];
                let g = if f >= 0.0 { -h.sqrt() } else { h.sqrt() };
                e[i] = scale * g;
                h -= f * g;
                a[[i, l]] = f - g;
                f = 0.0;
                for j in 0..=l {
                    let mut g = 0.0;
                    for k in 0..=j {
                        g += a[[j, k]] * a[[i, k]];
                    }
                    for k in j + 1..=l {
                        g += a[[k, j]] * a[[i, k]];
                    }
                    e[j] = g / h;
                    f += e[j] * a[[i, j]];
                }
                let hh = f / (h + h);
                for j in 0..=l {
                    let fj = a[[i, j]];
                    let gj = e[j] - hh * fj;
                    e[j] = gj;
                    for k in 0..=j {
                        a[[j, k]] -= fj * e[k] + gj * a[[i, k]];
                    }
                }
            }
        } else {
            e[i] = a[[i, l]];
        }
    }
    e[0] = 0.0;
}

/// QL iteration with implicit shifts on a tridiagonal matrix.
fn ql_implicit(d: &mut [f64], e: &mut [f64]) -> Result<(), ()> {
    let n = d.len();
    for i in 1..n {
        e[i - 1] = e[i];
    }
    e[n - 1] = 0.0;

    for l in 0..n {
        let mut iter = 0;
        loop {
            let mut m = l;
            while m < n - 1 {
                let dd = d[m].abs() + d[m + 1].abs();
                if e[m].abs() <= f64::EPSILON * dd + 1e-300 {
                    break;
                }
                m += 1;
            }
            if m == l {
                break;
            }
            iter += 1;
            if iter > 30 {
                return Err(());
            }

            let mut g = (d[l + 1] - d[l]) / (2.0 * e[l]);
            let mut r = g.hypot(1.0);
            g = d[m] - d[l] + e[l] / (g + r.copysign(g));
            let mut s = 1.0;
            let mut c = 1.0;
            let mut p = 0.0;
            let mut underflow = false;

            for i in (l..m).rev() {
                let f = s * e[i];
                let b = c * e[i];
                r = f.hypot(g);
                e[i + 1] = r;
                if r == 0.0 {
                    d[i + 1] -= p;
                    e[m] = 0.0;
                    underflow = true;
                    break;
                }
                s = f / r;
                c = g / r;
                g = d[i + 1] - p;
                r = (d[i] - g) * s + 2.0 * c * b;
                p = s * r;
                d[i + 1] = g + p;
                g = c * r - b;
            }
            if underflow {
                continue;
            }
            d[l] -= p;
            e[l] = g;
            e[m] = 0.0;
        }
    }
    Ok(())
}
